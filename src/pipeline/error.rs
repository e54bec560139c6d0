//! Reporting for isolated, per-item pipeline failures.
//!
//! Asset and voice failures never abort a batch; they are handed to an
//! [`ErrorReporter`] and the batch carries on.

use std::sync::Mutex;

/// Trait for reporting recoverable failures from a pipeline stage.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, stage: &str, error: &dyn std::error::Error);
}

/// Reporter that emits a `tracing` warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, error: &dyn std::error::Error) {
        tracing::warn!(stage, "{}", error);
    }
}

/// Reporter that keeps `"<stage>: <error>"` lines (for testing).
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<String>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, stage: &str, error: &dyn std::error::Error) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(format!("{}: {}", stage, error));
        }
    }
}
