//! Pipeline that runs from startup until shutdown.

use crate::assets::cache::AssetCache;
use crate::defaults;
use crate::feedback::FeedbackSink;
use crate::mapping::MappingStore;
use crate::pipeline::aggregator::FrameAggregator;
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::scheduler::{
    DebounceControl, PlaybackContext, PlaybackScheduler, SchedulerConfig,
};
use crate::playback::voice::VoicePlayer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Aggregation window
    pub frame_window: Duration,
    /// Initial debounce interval (adjustable later through the handle)
    pub debounce: Duration,
    /// Voice cap and stagger
    pub scheduler: SchedulerConfig,
    /// Decode event buffer
    pub decode_buffer: usize,
    /// Batch buffer between aggregator and scheduler
    pub batch_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_window: defaults::frame_window(),
            debounce: defaults::debounce(),
            scheduler: SchedulerConfig::default(),
            decode_buffer: defaults::DECODE_CHANNEL_CAPACITY,
            batch_buffer: defaults::BATCH_CHANNEL_CAPACITY,
        }
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    decode_tx: mpsc::Sender<String>,
    debounce: DebounceControl,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl PipelineHandle {
    /// Sender the decoder engine feeds raw codes into.
    pub fn decode_sender(&self) -> mpsc::Sender<String> {
        self.decode_tx.clone()
    }

    /// Runtime control over the debounce interval.
    pub fn debounce(&self) -> DebounceControl {
        self.debounce.clone()
    }

    /// Stops the pipeline once every other decode sender is gone.
    ///
    /// The open aggregation window is flushed and admitted. Waits up to 1s
    /// for each station; stragglers are detached.
    pub async fn stop(self) {
        drop(self.decode_tx);
        for (name, handle) in self.tasks {
            match tokio::time::timeout(Duration::from_secs(1), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(station = name, "station panicked: {}", e),
                Err(_) => tracing::warn!(station = name, "shutdown timeout, detaching"),
            }
        }
    }
}

/// Decode events → FrameAggregator → PlaybackScheduler → voices + feedback.
pub struct Pipeline {
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl Pipeline {
    /// Creates a new pipeline with default error reporter.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Starts both stations on the current tokio runtime.
    pub fn start(
        self,
        mapping: Arc<MappingStore>,
        cache: AssetCache,
        player: Arc<dyn VoicePlayer>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> PipelineHandle {
        let (decode_tx, decode_rx) = mpsc::channel(self.config.decode_buffer);
        let (batch_tx, batch_rx) = mpsc::channel(self.config.batch_buffer);

        let debounce = DebounceControl::new(self.config.debounce);
        let context = PlaybackContext {
            cache,
            player,
            feedback,
            reporter: self.error_reporter,
            stagger: self.config.scheduler.stagger,
        };
        let scheduler = PlaybackScheduler::new(
            mapping,
            debounce.clone(),
            self.config.scheduler.clone(),
            context,
        );
        let aggregator = FrameAggregator::with_window(self.config.frame_window);

        tracing::debug!(
            window_ms = self.config.frame_window.as_millis() as u64,
            max_voices = self.config.scheduler.max_voices,
            "pipeline started"
        );

        let tasks = vec![
            ("aggregator", tokio::spawn(aggregator.run(decode_rx, batch_tx))),
            ("scheduler", tokio::spawn(scheduler.run(batch_rx))),
        ];

        PipelineHandle {
            decode_tx,
            debounce,
            tasks,
        }
    }
}
