use anyhow::{Result, anyhow};
use image::DynamicImage;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::ocr::Recognizer;
use crate::ocr::{Detection, Quad, Segment};
use crate::translate::{TranslateFuture, TranslationService};

pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: Mutex<()> = Mutex::new(());
    let _guard = HOME_MUTEX.lock().unwrap_or_else(|err| err.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    // SAFETY: HOME_MUTEX serializes every test that touches the environment.
    unsafe { std::env::set_var("HOME", dir.path()) };
    let result = func(dir.path());
    unsafe {
        if let Some(old) = old_home {
            std::env::set_var("HOME", old);
        } else {
            std::env::remove_var("HOME");
        }
    }
    result
}

pub(crate) fn quad(x: f64, y: f64, w: f64, h: f64) -> Quad {
    [[x, y], [x + w, y], [x + w, y + h], [x, y + h]]
}

pub(crate) fn detection(text: &str, x: f64, y: f64, w: f64, h: f64, confidence: f64) -> Detection {
    Detection {
        bbox: quad(x, y, w, h),
        text: text.to_string(),
        confidence,
    }
}

pub(crate) fn segment(text: &str, x: f64, y: f64, w: f64, h: f64, confidence: f64) -> Segment {
    Segment {
        text: text.to_string(),
        bbox: quad(x, y, w, h),
        confidence,
    }
}

pub(crate) enum Scripted {
    Detections(Vec<Detection>),
    Fail(&'static str),
    Stall(Duration),
}

/// Recognizer that replays one scripted response per call, then returns nothing.
pub(crate) struct ScriptedRecognizer {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    releases: AtomicUsize,
    sizes: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedRecognizer {
    pub(crate) fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            sizes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub(crate) fn sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.lock().expect("sizes lock").clone()
    }
}

impl Recognizer for ScriptedRecognizer {
    fn label(&self) -> &str {
        "scripted"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sizes
            .lock()
            .expect("sizes lock")
            .push((image.width(), image.height()));
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Scripted::Detections(detections)) => Ok(detections),
            Some(Scripted::Fail(message)) => Err(anyhow!(message)),
            Some(Scripted::Stall(duration)) => {
                std::thread::sleep(duration);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    fn release_cache(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Translator that tags text with the language, returns it unchanged, or
/// always fails.
pub(crate) struct FakeTranslator {
    fail: bool,
    echo: bool,
    calls: AtomicUsize,
}

impl FakeTranslator {
    pub(crate) fn new(fail: bool) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            fail,
            echo: false,
            calls: AtomicUsize::new(0),
        })
    }

    /// Every text "translates" to itself, like a brand name.
    pub(crate) fn echo() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            fail: false,
            echo: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TranslationService for FakeTranslator {
    fn translate<'a>(&'a self, text: &'a str, target_lang: &'a str) -> TranslateFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (fail, echo) = (self.fail, self.echo);
        Box::pin(async move {
            if fail {
                return Err(anyhow!("quota exceeded"));
            }
            if echo {
                return Ok(text.to_string());
            }
            Ok(format!("[{}] {}", target_lang, text))
        })
    }
}
