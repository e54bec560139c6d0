//! Visual feedback for triggered figures.
//!
//! Fire-and-forget: the scheduler hands over `(label, role)` and moves on.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Receives one notification per scheduled voice.
pub trait FeedbackSink: Send + Sync {
    fn show(&self, label: &str, role: &str);
}

/// Display text for a feedback entry: `"Lion (Animal)"`.
pub fn format_entry(label: &str, role: &str) -> String {
    if role.is_empty() {
        label.to_string()
    } else {
        format!("{} ({})", label, role)
    }
}

/// Prints entries to stdout and keeps them visible for `ttl`.
pub struct ConsoleFeedback {
    ttl: Duration,
    color: bool,
    entries: Mutex<VecDeque<(Instant, String)>>,
}

impl ConsoleFeedback {
    pub fn new(ttl: Duration, color: bool) -> Self {
        Self {
            ttl,
            color,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Entries that have not expired yet, oldest first.
    pub fn visible(&self) -> Vec<String> {
        let Ok(mut entries) = self.entries.lock() else {
            return Vec::new();
        };
        self.expire(&mut entries, Instant::now());
        entries.iter().map(|(_, text)| text.clone()).collect()
    }

    fn expire(&self, entries: &mut VecDeque<(Instant, String)>, now: Instant) {
        while let Some((shown, _)) = entries.front() {
            if now.duration_since(*shown) < self.ttl {
                break;
            }
            entries.pop_front();
        }
    }

    #[cfg(feature = "cli")]
    fn render(&self, text: &str) -> String {
        use owo_colors::OwoColorize;
        if self.color {
            format!("{} {}", "♪".green(), text.bold())
        } else {
            format!("♪ {}", text)
        }
    }

    #[cfg(not(feature = "cli"))]
    fn render(&self, text: &str) -> String {
        let _ = self.color;
        format!("♪ {}", text)
    }
}

impl FeedbackSink for ConsoleFeedback {
    fn show(&self, label: &str, role: &str) {
        let text = format_entry(label, role);
        let line = self.render(&text);
        let mut stdout = io::stdout().lock();
        if writeln!(stdout, "{}", line).is_err() {
            tracing::debug!("stdout closed, feedback dropped");
        }
        if let Ok(mut entries) = self.entries.lock() {
            let now = Instant::now();
            self.expire(&mut entries, now);
            entries.push_back((now, text));
        }
    }
}

/// Feedback sink that collects entries (for testing).
#[derive(Debug, Default)]
pub struct CollectorFeedback {
    entries: Mutex<Vec<String>>,
}

impl CollectorFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl FeedbackSink for CollectorFeedback {
    fn show(&self, label: &str, role: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(format_entry(label, role));
        }
    }
}
