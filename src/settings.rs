use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub ocr: OcrSettings,
    pub engine: EngineSettings,
    pub overlay: OverlaySettings,
    pub translation: TranslationSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub min_confidence: f64,
    pub high_confidence: f64,
    pub pass_timeout: Duration,
    pub deskew_timeout: Duration,
    pub max_width: u32,
    pub deskew_when_empty: bool,
    pub preprocess_variants: Vec<String>,
    pub inverted_variants: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub command: String,
    pub languages: String,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub min_font_size: f32,
    pub font_family: Option<String>,
    pub font_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TranslationSettings {
    pub base_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
    pub warm_up: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr: OcrSettings {
                min_confidence: 0.2,
                high_confidence: 0.95,
                pass_timeout: Duration::from_secs(15),
                deskew_timeout: Duration::from_secs(30),
                max_width: 2000,
                deskew_when_empty: true,
                preprocess_variants: vec![
                    "grayscale".to_string(),
                    "adaptive".to_string(),
                    "otsu".to_string(),
                ],
                inverted_variants: vec!["grayscale".to_string()],
            },
            engine: EngineSettings {
                command: "tesseract".to_string(),
                languages: "eng+chi_sim".to_string(),
            },
            overlay: OverlaySettings {
                min_font_size: 10.0,
                font_family: None,
                font_path: None,
            },
            translation: TranslationSettings {
                base_url: None,
                timeout: Duration::from_secs(10),
            },
            server: ServerSettings {
                addr: "0.0.0.0:5001".to_string(),
                warm_up: true,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSection>,
    engine: Option<EngineSection>,
    overlay: Option<OverlaySection>,
    translation: Option<TranslationSection>,
    server: Option<ServerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSection {
    min_confidence: Option<f64>,
    high_confidence: Option<f64>,
    pass_timeout_secs: Option<u64>,
    deskew_timeout_secs: Option<u64>,
    max_width: Option<u32>,
    deskew_when_empty: Option<bool>,
    preprocess_variants: Option<Vec<String>>,
    inverted_variants: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSection {
    command: Option<String>,
    languages: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySection {
    min_font_size: Option<f32>,
    font_family: Option<String>,
    font_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSection {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    addr: Option<String>,
    warm_up: Option<bool>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let embedded: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML)
        .with_context(|| "failed to parse embedded settings")?;
    settings.merge(embedded);
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn merge_str(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(value) = ocr.min_confidence.filter(|v| (0.0..=1.0).contains(v)) {
                self.ocr.min_confidence = value;
            }
            if let Some(value) = ocr.high_confidence.filter(|v| (0.0..=1.0).contains(v)) {
                self.ocr.high_confidence = value;
            }
            if let Some(secs) = ocr.pass_timeout_secs.filter(|v| *v > 0) {
                self.ocr.pass_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = ocr.deskew_timeout_secs.filter(|v| *v > 0) {
                self.ocr.deskew_timeout = Duration::from_secs(secs);
            }
            if let Some(width) = ocr.max_width.filter(|v| *v > 0) {
                self.ocr.max_width = width;
            }
            if let Some(flag) = ocr.deskew_when_empty {
                self.ocr.deskew_when_empty = flag;
            }
            if let Some(variants) = ocr.preprocess_variants {
                self.ocr.preprocess_variants = clean_list(variants);
            }
            if let Some(variants) = ocr.inverted_variants {
                self.ocr.inverted_variants = clean_list(variants);
            }
        }
        if let Some(engine) = incoming.engine {
            if let Some(command) = engine.command {
                if !command.trim().is_empty() {
                    self.engine.command = command.trim().to_string();
                }
            }
            if let Some(languages) = engine.languages {
                if !languages.trim().is_empty() {
                    self.engine.languages = languages.trim().to_string();
                }
            }
        }
        if let Some(overlay) = incoming.overlay {
            if let Some(size) = overlay.min_font_size {
                if size > 0.0 {
                    self.overlay.min_font_size = size;
                }
            }
            if let Some(family) = overlay.font_family {
                if !family.trim().is_empty() {
                    self.overlay.font_family = Some(family);
                }
            }
            if let Some(path) = overlay.font_path {
                if !path.trim().is_empty() {
                    self.overlay.font_path = Some(path);
                }
            }
        }
        if let Some(translation) = incoming.translation {
            if let Some(url) = translation.base_url {
                if !url.trim().is_empty() {
                    self.translation.base_url = Some(url.trim().trim_end_matches('/').to_string());
                }
            }
            if let Some(secs) = translation.timeout_secs.filter(|v| *v > 0) {
                self.translation.timeout = Duration::from_secs(secs);
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = server.addr {
                if !addr.trim().is_empty() {
                    self.server.addr = addr.trim().to_string();
                }
            }
            if let Some(flag) = server.warm_up {
                self.server.warm_up = flag;
            }
        }
    }
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".ocr-translator-rust"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn embedded_defaults_match_struct_defaults() {
        let mut settings = Settings::default();
        settings.merge_str(DEFAULT_SETTINGS_TOML).unwrap();
        assert_eq!(settings.ocr.min_confidence, 0.2);
        assert_eq!(settings.ocr.high_confidence, 0.95);
        assert_eq!(settings.ocr.pass_timeout, Duration::from_secs(15));
        assert_eq!(settings.ocr.deskew_timeout, Duration::from_secs(30));
        assert_eq!(settings.ocr.inverted_variants, vec!["grayscale"]);
        assert_eq!(settings.overlay.font_family.as_deref(), Some("sans-serif"));
    }

    #[test]
    fn later_layers_override_and_invalid_values_are_ignored() {
        let mut settings = Settings::default();
        settings
            .merge_str(
                r#"
[ocr]
min_confidence = 1.5
high_confidence = 0.9
pass_timeout_secs = 0
preprocess_variants = [" Otsu ", ""]

[translation]
base_url = "http://localhost:9000/"
"#,
            )
            .unwrap();
        assert_eq!(settings.ocr.min_confidence, 0.2);
        assert_eq!(settings.ocr.high_confidence, 0.9);
        assert_eq!(settings.ocr.pass_timeout, Duration::from_secs(15));
        assert_eq!(settings.ocr.preprocess_variants, vec!["otsu"]);
        assert_eq!(
            settings.translation.base_url.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn load_settings_writes_home_file_and_reads_extra() {
        with_temp_home(|home| {
            let extra = home.join("extra.toml");
            std::fs::write(&extra, "[server]\naddr = \"127.0.0.1:7000\"\n").unwrap();
            let settings = load_settings(Some(&extra)).unwrap();
            assert_eq!(settings.server.addr, "127.0.0.1:7000");
            assert!(home.join(".ocr-translator-rust/settings.toml").exists());
        });
    }

    #[test]
    fn missing_extra_settings_is_an_error() {
        with_temp_home(|home| {
            let missing = home.join("nope.toml");
            assert!(load_settings(Some(&missing)).is_err());
        });
    }
}
