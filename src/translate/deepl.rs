use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;

use super::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use super::{TranslateFuture, TranslationService};
use crate::settings::TranslationSettings;

const FREE_BASE_URL: &str = "https://api-free.deepl.com";
const PRO_BASE_URL: &str = "https://api.deepl.com";
const FREE_KEY_SUFFIX: &str = ":fx";

#[derive(Debug, Clone)]
pub struct DeepL {
    key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl DeepL {
    pub fn new(key: Option<String>, settings: &TranslationSettings) -> Result<Self> {
        let key = key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let base_url = match (&settings.base_url, &key) {
            (Some(url), _) => url.clone(),
            (None, Some(key)) => default_base_url(key).to_string(),
            (None, None) => FREE_BASE_URL.to_string(),
        };
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .with_context(|| "failed to build HTTP client")?;
        Ok(Self {
            key,
            base_url,
            client,
        })
    }

    /// Reads the key from `DEEPL_API_KEY`, then `DEEPL_AUTH_KEY`.
    pub fn from_env(settings: &TranslationSettings) -> Result<Self> {
        let key = get_env("DEEPL_API_KEY").or_else(|| get_env("DEEPL_AUTH_KEY"));
        Self::new(key, settings)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(&self, text: &str, target_lang: &str) -> Result<String> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| anyhow!("DEEPL_API_KEY is not set"))?;
        let url = format!("{}/v2/translate", self.base_url);
        let body = json!({
            "text": [text],
            "target_lang": target_lang.trim().to_uppercase(),
        });

        let mut attempt = 0usize;
        let mut delay = RATE_LIMIT_BASE_DELAY;
        loop {
            attempt += 1;
            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("DeepL-Auth-Key {}", key))
                .json(&body)
                .send()
                .await
                .with_context(|| "translation request failed")?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return extract_translation(&text);
            }
            if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
                delay = wait_with_backoff("DeepL", attempt, delay, retry_after).await;
                continue;
            }
            return Err(anyhow!(
                "DeepL API error ({}): {}",
                status,
                extract_error(&text).unwrap_or(text)
            ));
        }
    }
}

impl TranslationService for DeepL {
    fn translate<'a>(&'a self, text: &'a str, target_lang: &'a str) -> TranslateFuture<'a> {
        Box::pin(self.call(text, target_lang))
    }
}

fn default_base_url(key: &str) -> &'static str {
    if key.ends_with(FREE_KEY_SUFFIX) {
        FREE_BASE_URL
    } else {
        PRO_BASE_URL
    }
}

fn extract_translation(body: &str) -> Result<String> {
    let parsed: TranslateResponse =
        serde_json::from_str(body).with_context(|| "failed to parse DeepL response")?;
    let text = parsed
        .translations
        .into_iter()
        .map(|translation| translation.text)
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        return Err(anyhow!("DeepL returned no translation"));
    }
    Ok(text)
}

fn extract_error(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body).ok()?.message
}

fn get_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
