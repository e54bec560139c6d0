//! scanchime - play a figure's sound when its code is scanned
//!
//! Decode events from a camera-driven decoder are batched into short windows,
//! deduplicated, debounced per code, and turned into staggered stereo voices.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod assets;
pub mod capture;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod console;
pub mod defaults;
pub mod error;
pub mod feedback;
pub mod mapping;
pub mod pipeline;
pub mod playback;

// Composition root - needs everything
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Core traits (decoder → scheduler → player)
pub use assets::fetch::AssetFetcher;
pub use capture::device::DeviceEnumerator;
pub use capture::engine::DecoderEngine;
pub use feedback::FeedbackSink;
pub use playback::voice::VoicePlayer;

// Core components
pub use assets::cache::AssetCache;
pub use capture::controller::CaptureController;
pub use mapping::{FigureRecord, MappingStore};
pub use pipeline::aggregator::FrameAggregator;
pub use pipeline::orchestrator::{Pipeline, PipelineConfig, PipelineHandle};
pub use pipeline::scheduler::{DebounceControl, PlaybackScheduler};

// Error handling
pub use error::{
    AssetLoadError, CaptureStartError, ChimeError, DeviceEnumerationError, MappingLoadError,
    PlaybackError, Result,
};
pub use pipeline::error::ErrorReporter;

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
