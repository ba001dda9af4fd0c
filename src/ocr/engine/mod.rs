mod parse;
mod tesseract;

use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::ocr::Detection;
use crate::task::run_gated_blocking;

pub use tesseract::{TesseractRecognizer, list_tesseract_languages};

/// A text-recognition backend. Calls block and may fail.
pub trait Recognizer: Send + Sync {
    fn label(&self) -> &str;

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<Detection>>;

    /// Drops any per-request cache or accelerator memory.
    fn release_cache(&self) {}
}

type RecognizerFactory = Arc<dyn Fn() -> Result<Arc<dyn Recognizer>> + Send + Sync>;

/// Shared, lazily created recognition engine.
///
/// The factory runs at most once per handle no matter how many callers race on
/// first use. Calls are serialized: the lock guard travels with the blocking
/// job, so a call that outlives its deadline still holds the engine until it
/// really returns. Waiting for the engine counts against each caller's deadline.
#[derive(Clone)]
pub struct EngineHandle {
    cell: Arc<OnceCell<Arc<dyn Recognizer>>>,
    factory: RecognizerFactory,
    gate: Arc<Mutex<()>>,
}

impl EngineHandle {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Recognizer>> + Send + Sync + 'static,
    {
        Self {
            cell: Arc::new(OnceCell::new()),
            factory: Arc::new(factory),
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_recognizer(recognizer: Arc<dyn Recognizer>) -> Self {
        Self::new(move || Ok(recognizer.clone()))
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }

    /// Returns the engine, creating it on first use.
    pub async fn get(&self) -> Result<Arc<dyn Recognizer>> {
        let factory = self.factory.clone();
        let engine = self
            .cell
            .get_or_try_init(|| async move {
                let engine = tokio::task::spawn_blocking(move || factory())
                    .await
                    .with_context(|| "engine initialization task failed")??;
                info!("recognition engine '{}' ready", engine.label());
                Ok::<_, anyhow::Error>(engine)
            })
            .await?;
        Ok(engine.clone())
    }

    pub async fn label(&self) -> Result<String> {
        Ok(self.get().await?.label().to_string())
    }

    /// One bounded recognition call. A timeout, including one spent waiting
    /// for a busy engine, yields no detections.
    pub async fn recognize(
        &self,
        image: Arc<DynamicImage>,
        deadline: Duration,
    ) -> Result<Vec<Detection>> {
        let engine = self.get().await?;
        run_gated_blocking(deadline, Vec::new(), self.gate.clone(), move || {
            engine.recognize(&image)
        })
        .await
    }

    /// Releases engine caches once the current holder of the engine is done.
    ///
    /// Gives up after `deadline`; the caches then stay until the next release.
    pub async fn release(&self, deadline: Duration) {
        let Some(engine) = self.cell.get().cloned() else {
            return;
        };
        let released = run_gated_blocking(deadline, false, self.gate.clone(), move || {
            engine.release_cache();
            Ok(true)
        })
        .await;
        if !matches!(released, Ok(true)) {
            warn!("engine busy; cache release skipped");
        }
    }
}

/// Builds the configured backend.
pub fn build_recognizer(command: &str, languages: &str) -> Result<Arc<dyn Recognizer>> {
    if command.trim().is_empty() {
        return Err(anyhow!("engine command is empty"));
    }
    let recognizer = TesseractRecognizer::new(command, languages)?;
    Ok(Arc::new(recognizer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{Scripted, ScriptedRecognizer, detection};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_callers_initialize_once() {
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = inits.clone();
        let handle = EngineHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(ScriptedRecognizer::new(Vec::new())) as Arc<dyn Recognizer>)
        });
        assert!(!handle.is_ready());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.get().await.map(|_| ()) }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(handle.is_ready());
    }

    #[tokio::test]
    async fn failed_initialization_is_retried_later() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let handle = EngineHandle::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow!("engine binary missing"))
            } else {
                Ok(Arc::new(ScriptedRecognizer::new(Vec::new())) as Arc<dyn Recognizer>)
            }
        });
        assert!(handle.get().await.is_err());
        assert!(!handle.is_ready());
        assert!(handle.get().await.is_ok());
        assert_eq!(handle.label().await.unwrap(), "scripted");
    }

    #[tokio::test]
    async fn recognize_returns_detections_and_times_out_to_empty() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            Scripted::Detections(vec![detection("Hello", 0.0, 0.0, 50.0, 20.0, 0.9)]),
            Scripted::Stall(Duration::from_millis(300)),
        ]));
        let handle = EngineHandle::from_recognizer(recognizer.clone());
        let image = Arc::new(DynamicImage::new_rgb8(10, 10));

        let first = handle
            .recognize(image.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = handle
            .recognize(image, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(second.is_empty());

        // The stalled call still owns the engine; release gives up instead of waiting.
        let started = Instant::now();
        handle.release(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(recognizer.releases(), 0);

        handle.release(Duration::from_secs(2)).await;
        assert_eq!(recognizer.releases(), 1);
        assert_eq!(recognizer.calls(), 2);
    }

    #[tokio::test]
    async fn busy_engine_times_out_without_being_called() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            Scripted::Stall(Duration::from_millis(400)),
            Scripted::Detections(vec![detection("Hello", 0.0, 0.0, 50.0, 20.0, 0.9)]),
        ]));
        let handle = EngineHandle::from_recognizer(recognizer.clone());
        let image = Arc::new(DynamicImage::new_rgb8(10, 10));

        let started = Instant::now();
        for _ in 0..3 {
            let detections = handle
                .recognize(image.clone(), Duration::from_millis(30))
                .await
                .unwrap();
            assert!(detections.is_empty());
        }
        assert!(started.elapsed() < Duration::from_millis(350));
        assert_eq!(recognizer.calls(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let detections = handle.recognize(image, Duration::from_secs(1)).await.unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[tokio::test]
    async fn release_before_first_use_is_a_no_op() {
        let recognizer = Arc::new(ScriptedRecognizer::new(Vec::new()));
        let handle = EngineHandle::from_recognizer(recognizer.clone());
        handle.release(Duration::from_secs(1)).await;
        assert_eq!(recognizer.releases(), 0);
    }
}
