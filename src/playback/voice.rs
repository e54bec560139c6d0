//! The playback primitive: start one independent voice.

use crate::assets::decode::AudioBuffer;
use crate::error::PlaybackError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One scheduled instance of an audio buffer.
#[derive(Debug, Clone)]
pub struct Voice {
    /// Asset reference the buffer was loaded from.
    pub asset: String,
    pub buffer: Arc<AudioBuffer>,
    /// Stereo position, -1.0 (left) to 1.0 (right).
    pub pan: f32,
    /// Scheduling reference time shared by every voice of a batch.
    pub reference: Instant,
    /// Onset offset from `reference`.
    pub offset: Duration,
}

impl Voice {
    /// Absolute onset time.
    pub fn start_at(&self) -> Instant {
        self.reference + self.offset
    }
}

/// Starts voices on an output device.
///
/// Implementations must not block: a voice is queued for its onset time and
/// plays independently of every other voice.
pub trait VoicePlayer: Send + Sync {
    fn play(&self, voice: Voice) -> Result<(), PlaybackError>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "player"
    }
}

/// Player that records voices instead of playing them (for testing).
#[derive(Debug, Default)]
pub struct RecordingPlayer {
    played: Mutex<Vec<Voice>>,
    failing: HashSet<String>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every voice for `asset`.
    pub fn with_failure(mut self, asset: &str) -> Self {
        self.failing.insert(asset.to_string());
        self
    }

    /// All voices played so far, in call order.
    pub fn played(&self) -> Vec<Voice> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Asset references played so far, in call order.
    pub fn played_assets(&self) -> Vec<String> {
        self.played().into_iter().map(|v| v.asset).collect()
    }
}

impl VoicePlayer for RecordingPlayer {
    fn play(&self, voice: Voice) -> Result<(), PlaybackError> {
        if self.failing.contains(&voice.asset) {
            return Err(PlaybackError::InvalidBuffer {
                asset: voice.asset,
                message: "rejected by test player".to_string(),
            });
        }
        self.played
            .lock()
            .map_err(|e| PlaybackError::Failed {
                message: format!("Failed to lock recorder: {}", e),
            })?
            .push(voice);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
