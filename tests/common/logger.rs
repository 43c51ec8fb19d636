//! Phase-tracking test logger.
//!
//! Writes one line per event to stderr (visible with `--nocapture`):
//!
//! ```text
//! [  12ms] sync_pages_through_remote setup | mounting mocks
//! ```
//!
//! `TEST_LOG_LEVEL` (trace..error, default info) filters the output and
//! `TEST_LOG_JSON=1` switches to one JSON object per line.

use std::cell::RefCell;
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn from_env() -> Self {
        match std::env::var("TEST_LOG_LEVEL")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

#[derive(Serialize)]
struct Entry<'a> {
    test: &'a str,
    phase: &'a str,
    level: Level,
    elapsed_ms: u128,
    message: &'a str,
}

/// Logger for one test.
pub struct TestLogger {
    name: String,
    started: Instant,
    phase: RefCell<String>,
    threshold: Level,
    json: bool,
}

impl TestLogger {
    pub fn new(name: &str) -> Self {
        let json = std::env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
        let logger = Self {
            name: name.to_string(),
            started: Instant::now(),
            phase: RefCell::new("start".to_string()),
            threshold: Level::from_env(),
            json,
        };
        logger.emit(Level::Debug, "begin");
        logger
    }

    /// Enter a named phase (setup, execute, verify, ...).
    pub fn phase(&self, phase: &str) {
        *self.phase.borrow_mut() = phase.to_string();
        self.emit(Level::Debug, "phase");
    }

    pub fn debug(&self, message: &str) {
        self.emit(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    pub fn http_request(&self, method: &str, url: &str) {
        self.emit(Level::Debug, &format!("{method} {url}"));
    }

    pub fn finish_ok(&self) {
        self.emit(Level::Info, "ok");
    }

    pub fn finish_err(&self, reason: &str) {
        self.emit(Level::Error, &format!("failed: {reason}"));
    }

    fn emit(&self, level: Level, message: &str) {
        if level < self.threshold {
            return;
        }
        let phase = self.phase.borrow();
        let elapsed_ms = self.started.elapsed().as_millis();
        if self.json {
            let entry = Entry {
                test: &self.name,
                phase: &phase,
                level,
                elapsed_ms,
                message,
            };
            if let Ok(line) = serde_json::to_string(&entry) {
                eprintln!("{line}");
            }
        } else {
            eprintln!("[{elapsed_ms:>5}ms] {} {} | {message}", self.name, phase);
        }
    }
}
