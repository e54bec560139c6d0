//! Decode-to-playback pipeline.
//!
//! Two async stations connected by bounded tokio channels: the frame
//! aggregator batches raw decode events into windows, the scheduler admits
//! each batch and fans it out to the playback primitive.

pub mod aggregator;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod types;

pub use aggregator::FrameAggregator;
pub use error::{CollectingReporter, ErrorReporter, LogReporter};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineHandle};
pub use scheduler::{
    DebounceControl, DebounceTable, PlaybackContext, PlaybackScheduler, SchedulerConfig, pan_for,
};
pub use types::{Admission, Frame, PlaybackReport};
