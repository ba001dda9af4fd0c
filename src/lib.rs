use anyhow::{Context, Result, anyhow};
use std::path::Path;
use tracing::info;

pub mod logging;
pub mod ocr;
pub mod server;
pub mod service;
pub mod settings;
pub mod task;
pub mod translate;

#[cfg(test)]
mod test_util;

pub use service::{NO_TEXT_DETECTED, OcrOptions, OcrOutcome, OcrService, TranslationOutcome};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub data: Option<String>,
    pub lang: Option<String>,
    pub overlay: Option<String>,
    pub boxes_only: bool,
    pub segments: bool,
    pub settings_path: Option<String>,
    pub show_ocr_languages: bool,
}

/// One-shot mode: recognizes `config.data` and returns the text to print.
pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;

    if config.show_ocr_languages {
        let languages = ocr::list_tesseract_languages(&settings.engine.command)?;
        return Ok(languages.join("\n"));
    }

    let data = config
        .data
        .as_deref()
        .ok_or_else(|| anyhow!("--data <image> is required"))?;
    let image =
        image::open(data).with_context(|| format!("failed to open image: {}", data))?;

    let service = OcrService::from_settings(&settings)?;
    let options = OcrOptions {
        target_lang: config.lang.clone(),
        return_overlay: config.overlay.is_some(),
        boxes_only: config.boxes_only,
        include_segments: config.segments,
    };
    let outcome = service.process(image, &options).await?;

    if let (Some(path), Some(png)) = (config.overlay.as_deref(), outcome.overlay_png.as_ref()) {
        std::fs::write(path, png)
            .with_context(|| format!("failed to write overlay: {}", path))?;
        info!("overlay written to {}", path);
    }

    Ok(format_outcome(&outcome, config.segments))
}

pub fn format_outcome(outcome: &OcrOutcome, segments: bool) -> String {
    let Some(best) = outcome.report.best.as_ref() else {
        return NO_TEXT_DETECTED.to_string();
    };
    let mut out = best.text.clone();
    match &outcome.translation {
        Some(TranslationOutcome::Translated(text)) => {
            out.push_str("\n\n");
            out.push_str(text);
        }
        Some(TranslationOutcome::Failed { note }) => {
            out.push_str("\n\n");
            out.push_str(note);
        }
        None => {}
    }
    if segments {
        let translating = outcome.translation.is_some();
        out.push('\n');
        for (line, overlay_text) in outcome.report.lines.iter().zip(&outcome.overlay_texts) {
            let [[x0, y0], _, [x1, y1], _] = line.bbox;
            out.push_str(&format!(
                "\n[{:.0},{:.0} {:.0}x{:.0}] ({:.2}) {}",
                x0,
                y0,
                x1 - x0,
                y1 - y0,
                line.confidence,
                line.text.replace('\n', " / ")
            ));
            if let Some(text) = overlay_text.as_ref().filter(|_| translating) {
                out.push_str(&format!(" -> {}", text.replace('\n', " / ")));
            }
        }
    }
    out
}
