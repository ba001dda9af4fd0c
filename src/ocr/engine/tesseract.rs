use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use super::Recognizer;
use super::parse::parse_tsv_words;
use crate::ocr::Detection;

/// Sparse-text segmentation: screenshots rarely hold one uniform block.
const PAGE_SEGMENTATION_MODE: u32 = 11;

pub struct TesseractRecognizer {
    command: String,
    languages: String,
}

impl TesseractRecognizer {
    pub fn new(command: &str, requested_languages: &str) -> Result<Self> {
        let command = command.trim().to_string();
        let languages = normalize_ocr_languages(&command, requested_languages)?;
        Ok(Self { command, languages })
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    fn run_tsv(&self, path: &Path) -> Result<String> {
        let output = Command::new(&self.command)
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("--oem")
            .arg("1")
            .arg("--psm")
            .arg(PAGE_SEGMENTATION_MODE.to_string())
            .arg("tsv")
            .output()
            .with_context(|| format!("failed to run {} (is it installed?)", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} failed: {}", self.command, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Recognizer for TesseractRecognizer {
    fn label(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let mut tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .with_context(|| "failed to create temp file for OCR")?;
        image
            .write_to(&mut tmp, image::ImageFormat::Png)
            .with_context(|| "failed to write temp image for OCR")?;
        tmp.flush().ok();

        let tsv = self.run_tsv(tmp.path())?;
        let detections = parse_tsv_words(&tsv);
        debug!(
            "{} returned {} words for {}x{} image",
            self.command,
            detections.len(),
            image.width(),
            image.height()
        );
        Ok(detections)
    }
}

pub fn list_tesseract_languages(command: &str) -> Result<Vec<String>> {
    let output = Command::new(command)
        .arg("--list-langs")
        .output()
        .with_context(|| format!("failed to run {} --list-langs", command))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("{} --list-langs failed: {}", command, stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_language_list(&stdout))
}

fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_ocr_languages(command: &str, requested: &str) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let available = match list_tesseract_languages(command) {
        Ok(list) => list,
        Err(err) => {
            warn!("could not list engine languages: {:#}", err);
            return Ok(trimmed.to_string());
        }
    };
    choose_languages(trimmed, &available)
}

fn choose_languages(requested: &str, available: &[String]) -> Result<String> {
    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for raw in requested.split(['+', ',', ' ']) {
        let lang = raw.trim();
        if lang.is_empty() {
            continue;
        }
        if available.iter().any(|value| value == lang) {
            chosen.push(lang.to_string());
        } else {
            missing.push(lang.to_string());
        }
    }

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}
