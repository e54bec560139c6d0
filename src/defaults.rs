//! Default configuration constants for scanchime.
//!
//! Shared by the config layer, the pipeline stations and the capture controller
//! so every entry point agrees on the same tuning.

use std::time::Duration;

/// Aggregation window (W) in milliseconds.
///
/// Decoders report the same code on consecutive video frames; 50ms coalesces a
/// burst into one evaluation pass while keeping reaction latency below what a
/// person notices.
pub const FRAME_WINDOW_MS: u64 = 50;

/// Debounce interval (D) in milliseconds.
///
/// Minimum time between two accepted triggers of the same code.
pub const DEBOUNCE_MS: u64 = 250;

/// Maximum number of voices (V) scheduled from a single batch.
pub const MAX_VOICES: usize = 10;

/// Per-voice onset offset in milliseconds within one batch.
pub const STAGGER_MS: u64 = 12;

/// Output sample rate requested from the audio device.
pub const OUTPUT_SAMPLE_RATE: u32 = 48000;

/// How long a freshly spawned decoder process must stay alive to count as started.
pub const STARTUP_PROBE_MS: u64 = 200;

/// Capacity of the channel between the decoder engine and the frame aggregator.
pub const DECODE_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the channel between the frame aggregator and the scheduler.
pub const BATCH_CHANNEL_CAPACITY: usize = 32;

/// Default external decoder command (zbar's webcam scanner).
pub const DECODER_COMMAND: &str = "zbarcam";

/// Default arguments for [`DECODER_COMMAND`]: raw payloads, no preview window.
pub const DECODER_ARGS: &[&str] = &["--raw", "--nodisplay"];

/// Where Linux exposes video capture devices.
pub const VIDEO_CLASS_DIR: &str = "/sys/class/video4linux";

/// How long a feedback entry stays visible on the console.
pub const FEEDBACK_TTL_MS: u64 = 1500;

/// Default mapping document.
pub const MAPPING_SOURCE: &str = "figures.json";

/// Environment variable prefix for config overrides.
pub const ENV_PREFIX: &str = "SCANCHIME_";

/// Convenience: the aggregation window as a [`Duration`].
pub fn frame_window() -> Duration {
    Duration::from_millis(FRAME_WINDOW_MS)
}

/// Convenience: the debounce interval as a [`Duration`].
pub fn debounce() -> Duration {
    Duration::from_millis(DEBOUNCE_MS)
}

/// Convenience: the per-voice stagger as a [`Duration`].
pub fn stagger() -> Duration {
    Duration::from_millis(STAGGER_MS)
}
