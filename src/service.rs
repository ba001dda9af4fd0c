use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::ocr::{
    EngineHandle, OcrPipeline, OverlayFonts, OverlayLine, OverlayOptions, PipelineReport,
    build_recognizer, render_overlay,
};
use crate::settings::Settings;
use crate::translate::{DeepL, TranslationService};

/// Transcript reported when no candidate clears the confidence floor.
pub const NO_TEXT_DETECTED: &str = "No text detected";

/// Per-request switches.
#[derive(Debug, Clone, Default)]
pub struct OcrOptions {
    pub target_lang: Option<String>,
    pub return_overlay: bool,
    pub boxes_only: bool,
    pub include_segments: bool,
}

impl OcrOptions {
    fn target_lang(&self) -> Option<&str> {
        self.target_lang
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranslationOutcome {
    Translated(String),
    /// The transcript is still returned; `note` says why there is no translation.
    Failed { note: String },
}

#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub report: PipelineReport,
    /// `None` when no target language was requested or nothing was recognized.
    pub translation: Option<TranslationOutcome>,
    /// Text painted over each of `report.lines`, index for index.
    pub overlay_texts: Vec<Option<String>>,
    pub overlay_png: Option<Vec<u8>>,
}

impl OcrOutcome {
    pub fn text(&self) -> Option<&str> {
        self.report.best.as_ref().map(|best| best.text.as_str())
    }
}

/// Recognition, translation and overlay for one image at a time.
#[derive(Clone)]
pub struct OcrService {
    pipeline: OcrPipeline,
    translator: Arc<dyn TranslationService>,
    overlay: OverlayOptions,
    /// Picks the overlay font from the painted text; `overlay.font` otherwise.
    fonts: Option<Arc<OverlayFonts>>,
}

impl OcrService {
    pub fn new(
        pipeline: OcrPipeline,
        translator: Arc<dyn TranslationService>,
        overlay: OverlayOptions,
    ) -> Self {
        Self {
            pipeline,
            translator,
            overlay,
            fonts: None,
        }
    }

    /// Wires the tesseract engine, DeepL and the overlay font from settings.
    ///
    /// The engine itself is created lazily on first use.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let command = settings.engine.command.clone();
        let languages = settings.engine.languages.clone();
        let engine = EngineHandle::new(move || build_recognizer(&command, &languages));
        let pipeline = OcrPipeline::new(engine, settings.ocr.clone());

        let translator = DeepL::from_env(&settings.translation)?;

        let font_path = settings.overlay.font_path.as_deref().map(Path::new);
        let font_family = settings.overlay.font_family.as_deref();
        let fonts = OverlayFonts::new(font_path, font_family).or_else(|err| {
            warn!("overlay font file unusable; trying system fonts: {:#}", err);
            OverlayFonts::new(None, font_family)
        })?;
        let overlay = OverlayOptions {
            boxes_only: false,
            min_font_size: settings.overlay.min_font_size,
            font: None,
        };

        Ok(Self {
            fonts: Some(Arc::new(fonts)),
            ..Self::new(pipeline, Arc::new(translator), overlay)
        })
    }

    pub fn engine(&self) -> &EngineHandle {
        self.pipeline.engine()
    }

    pub async fn translate(&self, text: &str, target_lang: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("text is empty"));
        }
        self.translator.translate(text, target_lang.trim()).await
    }

    pub async fn process(&self, image: DynamicImage, options: &OcrOptions) -> Result<OcrOutcome> {
        let source = options.return_overlay.then(|| image.clone());
        let report = self.pipeline.run(image).await?;
        let Some(best) = report.best.as_ref() else {
            return Ok(OcrOutcome {
                report,
                translation: None,
                overlay_texts: Vec::new(),
                overlay_png: None,
            });
        };

        let translation = match options.target_lang() {
            Some(lang) => Some(match self.translator.translate(&best.text, lang).await {
                Ok(translated) => TranslationOutcome::Translated(translated),
                Err(err) => {
                    warn!("translation to {} failed: {:#}", lang, err);
                    TranslationOutcome::Failed {
                        note: format!("Translation failed: {}", err),
                    }
                }
            }),
            None => None,
        };

        let overlay_texts = self.overlay_texts(&report, options, translation.as_ref()).await;

        let overlay_png = match source {
            Some(source) => {
                let lines = report
                    .lines
                    .iter()
                    .zip(&overlay_texts)
                    .map(|(line, text)| OverlayLine {
                        bbox: line.bbox,
                        text: text.clone().unwrap_or_default(),
                    })
                    .collect::<Vec<_>>();
                self.render(source, lines, options.boxes_only).await
            }
            None => None,
        };

        Ok(OcrOutcome {
            report,
            translation,
            overlay_texts,
            overlay_png,
        })
    }

    /// Line text for the overlay: translated per line when a translation was
    /// requested, the recognized text otherwise. A failed whole-text
    /// translation leaves every line without text.
    async fn overlay_texts(
        &self,
        report: &PipelineReport,
        options: &OcrOptions,
        translation: Option<&TranslationOutcome>,
    ) -> Vec<Option<String>> {
        if !(options.return_overlay || options.include_segments) || options.boxes_only {
            return vec![None; report.lines.len()];
        }
        let lang = match (options.target_lang(), translation) {
            (Some(lang), Some(TranslationOutcome::Translated(_))) => lang,
            (Some(_), _) => return vec![None; report.lines.len()],
            (None, _) => {
                return report
                    .lines
                    .iter()
                    .map(|line| Some(line.text.clone()))
                    .collect();
            }
        };

        let mut texts = Vec::with_capacity(report.lines.len());
        for (idx, line) in report.lines.iter().enumerate() {
            match self.translator.translate(&line.text, lang).await {
                Ok(translated) => texts.push(Some(translated)),
                Err(err) => {
                    warn!("overlay line {} left untranslated: {:#}", idx, err);
                    texts.push(None);
                }
            }
        }
        texts
    }

    async fn render(
        &self,
        image: DynamicImage,
        lines: Vec<OverlayLine>,
        boxes_only: bool,
    ) -> Option<Vec<u8>> {
        let mut options = OverlayOptions {
            boxes_only,
            ..self.overlay.clone()
        };
        let fonts = self.fonts.clone().filter(|_| !boxes_only);
        let rendered = tokio::task::spawn_blocking(move || {
            if let Some(fonts) = fonts {
                let painted = lines.iter().map(|line| line.text.as_str()).collect::<String>();
                options.font = fonts.for_text(&painted);
            }
            render_overlay(&image, &lines, &options)
        })
        .await
        .with_context(|| "overlay task failed")
        .and_then(|result| result);
        match rendered {
            Ok(png) => Some(png),
            Err(err) => {
                warn!("overlay rendering failed: {:#}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeTranslator, Scripted, ScriptedRecognizer, detection};
    use std::time::Duration;

    fn service(script: Vec<Scripted>, translator: Arc<FakeTranslator>) -> OcrService {
        let mut settings = Settings::default().ocr;
        settings.min_confidence = 0.1;
        settings.pass_timeout = Duration::from_millis(500);
        let engine = EngineHandle::from_recognizer(Arc::new(ScriptedRecognizer::new(script)));
        OcrService::new(
            OcrPipeline::new(engine, settings),
            translator,
            OverlayOptions::default(),
        )
    }

    fn two_lines() -> Scripted {
        Scripted::Detections(vec![
            detection("Hello", 10.0, 10.0, 60.0, 20.0, 0.97),
            detection("World", 80.0, 10.0, 60.0, 20.0, 0.97),
            detection("Goodbye", 10.0, 120.0, 90.0, 20.0, 0.97),
        ])
    }

    fn image() -> DynamicImage {
        DynamicImage::new_rgb8(200, 160)
    }

    #[tokio::test]
    async fn translates_the_transcript_and_each_overlay_line() {
        let translator = FakeTranslator::new(false);
        let service = service(vec![two_lines()], translator.clone());
        let options = OcrOptions {
            target_lang: Some(" zh ".to_string()),
            return_overlay: true,
            ..OcrOptions::default()
        };
        let outcome = service.process(image(), &options).await.unwrap();

        assert_eq!(outcome.text(), Some("Hello World Goodbye"));
        assert_eq!(
            outcome.translation,
            Some(TranslationOutcome::Translated("[zh] Hello World Goodbye".to_string()))
        );
        assert_eq!(
            outcome.overlay_texts,
            vec![
                Some("[zh] Hello World".to_string()),
                Some("[zh] Goodbye".to_string())
            ]
        );
        assert_eq!(translator.calls(), 3);
        let png = outcome.overlay_png.unwrap();
        assert_eq!(image::load_from_memory(&png).unwrap().width(), 200);
    }

    #[tokio::test]
    async fn failed_translation_keeps_the_transcript() {
        let translator = FakeTranslator::new(true);
        let service = service(vec![two_lines()], translator.clone());
        let options = OcrOptions {
            target_lang: Some("de".to_string()),
            return_overlay: true,
            ..OcrOptions::default()
        };
        let outcome = service.process(image(), &options).await.unwrap();

        assert_eq!(outcome.text(), Some("Hello World Goodbye"));
        match outcome.translation {
            Some(TranslationOutcome::Failed { note }) => assert!(note.contains("quota exceeded")),
            other => panic!("unexpected translation: {:?}", other),
        }
        assert_eq!(outcome.overlay_texts, vec![None, None]);
        assert_eq!(translator.calls(), 1);
        assert!(outcome.overlay_png.is_some());
    }

    #[tokio::test]
    async fn nothing_recognized_skips_translation() {
        let translator = FakeTranslator::new(false);
        let service = service(Vec::new(), translator.clone());
        let options = OcrOptions {
            target_lang: Some("ja".to_string()),
            return_overlay: true,
            ..OcrOptions::default()
        };
        let outcome = service.process(image(), &options).await.unwrap();

        assert_eq!(outcome.text(), None);
        assert!(outcome.translation.is_none());
        assert!(outcome.overlay_png.is_none());
        assert_eq!(translator.calls(), 0);
    }

    #[tokio::test]
    async fn overlay_without_language_repaints_recognized_text() {
        let service = service(vec![two_lines()], FakeTranslator::new(false));
        let options = OcrOptions {
            return_overlay: true,
            ..OcrOptions::default()
        };
        let outcome = service.process(image(), &options).await.unwrap();
        assert!(outcome.translation.is_none());
        assert_eq!(
            outcome.overlay_texts,
            vec![Some("Hello World".to_string()), Some("Goodbye".to_string())]
        );
    }

    #[tokio::test]
    async fn boxes_only_paints_no_text() {
        let translator = FakeTranslator::new(false);
        let service = service(vec![two_lines()], translator.clone());
        let options = OcrOptions {
            return_overlay: true,
            boxes_only: true,
            ..OcrOptions::default()
        };
        let outcome = service.process(image(), &options).await.unwrap();
        assert_eq!(outcome.overlay_texts, vec![None, None]);
        assert!(outcome.overlay_png.is_some());
        assert_eq!(translator.calls(), 0);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_translating() {
        let translator = FakeTranslator::new(false);
        let service = service(Vec::new(), translator.clone());
        assert!(service.translate("   ", "zh").await.is_err());
        assert_eq!(service.translate(" hi ", " fr ").await.unwrap(), "[fr] hi");
        assert_eq!(translator.calls(), 1);
    }
}
