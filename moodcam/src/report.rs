//! Status and debug text surfaces.
//!
//! The pipeline never talks to a concrete output. It gets a [`Reporter`] holding two
//! [`PresentationSink`]s, one for the primary status line and one for debug information, and
//! overwrites their text as it goes.
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

/// Texts shown on the status sink.
pub mod text {
    pub const CHECKING_MODELS: &str = "Checking model files…";
    pub const MODELS_MISSING: &str = "Model files missing. Check /models folder.";
    pub const LOADING_MODELS: &str = "Loading models…";
    pub const MODELS_LOADED: &str = "Models loaded";
    pub const MODEL_LOAD_FAILED: &str = "Model loading failed. See console.";
    pub const CAMERA_UNAVAILABLE: &str = "Camera access denied or unavailable.";
    pub const CAMERA_ACTIVE: &str = "Camera active. Starting detection…";
    pub const WAITING_FOR_FRAMES: &str = "Camera active. Waiting for frames...";
    pub const NO_FACE: &str = "No face";
    pub const NO_EXPRESSIONS: &str = "No expressions";
    pub const EXPRESSION_UNCLEAR: &str = "Expression unclear";
}

/// A surface showing a single line of text.
pub trait PresentationSink: Send + Sync {
    /// Replace the shown text.
    fn report(&self, text: &str);
}

/// Writes text changes to the log.
pub struct LogSink {
    name: &'static str,
    level: log::Level,
    last: Mutex<String>,
}

impl LogSink {
    pub fn new(name: &'static str, level: log::Level) -> Self {
        Self {
            name,
            level,
            last: Mutex::new(String::new()),
        }
    }
}

impl PresentationSink for LogSink {
    fn report(&self, text: &str) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        // The loop repeats the same text every frame
        if *last == text {
            return;
        }
        text.clone_into(&mut *last);
        log::log!(self.level, "[{}] {}", self.name, text);
    }
}

/// Keeps the latest text for others to read or watch.
pub struct SharedText {
    tx: watch::Sender<String>,
}

impl SharedText {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(String::new());
        Self { tx }
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for SharedText {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationSink for SharedText {
    fn report(&self, text: &str) {
        self.tx.send_if_modified(|current| {
            if *current == text {
                return false;
            }
            text.clone_into(current);
            true
        });
    }
}

/// Forwards text to several sinks.
pub struct Fanout(Vec<Arc<dyn PresentationSink>>);

impl Fanout {
    pub fn new(sinks: Vec<Arc<dyn PresentationSink>>) -> Self {
        Self(sinks)
    }
}

impl PresentationSink for Fanout {
    fn report(&self, text: &str) {
        for sink in self.0.iter() {
            sink.report(text);
        }
    }
}

/// The status and debug sinks handed through the pipeline.
#[derive(Clone)]
pub struct Reporter {
    status: Arc<dyn PresentationSink>,
    debug: Arc<dyn PresentationSink>,
}

impl Reporter {
    pub fn new(status: Arc<dyn PresentationSink>, debug: Arc<dyn PresentationSink>) -> Self {
        Self { status, debug }
    }

    /// Status at info level, debug at debug level, both only to the log.
    pub fn logging() -> Self {
        Self::new(
            Arc::new(LogSink::new("status", log::Level::Info)),
            Arc::new(LogSink::new("debug", log::Level::Debug)),
        )
    }

    pub fn set_status(&self, text: &str) {
        self.status.report(text);
    }

    pub fn set_debug(&self, text: &str) {
        self.debug.report(text);
    }
}
