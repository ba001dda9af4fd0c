use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

mod deepl;
mod retry;

pub use deepl::DeepL;

pub type TranslateFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// A translation backend: text and a target language code in, translated text out.
///
/// Failures are whole-call failures; there is no partial output.
pub trait TranslationService: Send + Sync {
    fn translate<'a>(&'a self, text: &'a str, target_lang: &'a str) -> TranslateFuture<'a>;
}
