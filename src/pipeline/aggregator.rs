//! Frame aggregator station.
//!
//! Collects decode events into fixed-length windows. The first event of a
//! window arms a flush deadline `W` in the future; everything arriving before
//! the deadline joins the same frame. At the deadline the buffer is swapped
//! for an empty one and handed downstream as one batch.

use crate::defaults;
use crate::pipeline::types::Frame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Windowed batcher for raw decode events.
pub struct FrameAggregator {
    window: Duration,
    buffer: Vec<String>,
    /// Pending flush; `Some` means a timer is armed.
    deadline: Option<Instant>,
    next_sequence: u64,
}

impl FrameAggregator {
    /// Creates an aggregator with the default 50ms window.
    pub fn new() -> Self {
        Self::with_window(defaults::frame_window())
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            buffer: Vec::new(),
            deadline: None,
            next_sequence: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Current flush deadline, if a window is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Number of events buffered in the open window.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Add one decode event.
    ///
    /// Blank events are ignored. Returns `true` when this event opened a new
    /// window (armed the flush timer).
    pub fn push(&mut self, raw: &str, now: Instant) -> bool {
        let code = raw.trim();
        if code.is_empty() {
            return false;
        }
        self.buffer.push(code.to_string());

        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.window);
        true
    }

    /// Close the open window and return its frame.
    pub fn flush(&mut self, now: Instant) -> Option<Frame> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        let codes = std::mem::take(&mut self.buffer);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some(Frame::new(codes, sequence, now))
    }

    /// Runs the aggregator station until the input closes.
    ///
    /// A still-open window is flushed when the input closes.
    pub async fn run(mut self, mut input: mpsc::Receiver<String>, output: mpsc::Sender<Frame>) {
        loop {
            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                _ = timer => {
                    if let Some(frame) = self.flush(Instant::now())
                        && output.send(frame).await.is_err()
                    {
                        break;
                    }
                }
                event = input.recv() => match event {
                    Some(raw) => {
                        self.push(&raw, Instant::now());
                    }
                    None => {
                        if let Some(frame) = self.flush(Instant::now()) {
                            let _ = output.send(frame).await;
                        }
                        break;
                    }
                },
            }
        }
        tracing::debug!("frame aggregator stopped");
    }
}

impl Default for FrameAggregator {
    fn default() -> Self {
        Self::new()
    }
}
