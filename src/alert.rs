//! User-visible notifications for failures that must not stop the process.
//!
//! In the long-lived `dev` pipeline a broken stylesheet or a missing include
//! is reported here and the watcher keeps running. One-shot pipelines don't
//! use alerts at all, their failures end the run.

use std::sync::{Mutex, PoisonError};

use console::style;

use crate::error::TaskError;

/// A notification carrying a component label and the underlying message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Component label, e.g. `SCSS` or `JS`.
    pub title: &'static str,
    pub message: String,
}

impl Alert {
    pub fn new(title: &'static str, message: impl Into<String>) -> Self {
        Self {
            title,
            message: message.into(),
        }
    }
}

impl From<&TaskError> for Alert {
    fn from(err: &TaskError) -> Self {
        Alert::new(err.title(), format!("Error {err}"))
    }
}

/// Destination for alerts.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Prints alerts to stderr and records them as `tracing` errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct Console;

impl AlertSink for Console {
    fn alert(&self, alert: Alert) {
        tracing::error!(title = alert.title, "{}", alert.message);
        eprintln!(
            "{} {}",
            style(format!(" {} ", alert.title)).white().on_red().bold(),
            alert.message
        );
    }
}

/// Keeps alerts in memory.
#[derive(Debug, Default)]
pub struct Recorder {
    alerts: Mutex<Vec<Alert>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl AlertSink for Recorder {
    fn alert(&self, alert: Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert);
    }
}
