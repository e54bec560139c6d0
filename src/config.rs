use crate::capture::device::Facing;
use crate::capture::engine::ScanConfig;
use crate::defaults;
use crate::error::{ChimeError, Result};
use crate::pipeline::orchestrator;
use crate::pipeline::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub mapping: MappingConfig,
    pub assets: AssetsConfig,
    pub capture: CaptureConfig,
    pub audio: AudioConfig,
    pub feedback: FeedbackConfig,
}

/// Batching and admission parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_window_ms: u64,
    pub debounce_ms: u64,
    pub max_voices: usize,
    pub stagger_ms: u64,
}

/// Where the figure mapping document lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MappingConfig {
    /// File path or http(s) URL.
    pub source: String,
}

/// Where sound assets are fetched from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    /// Directory or http(s) base URL that sound references resolve against.
    pub base: String,
    /// Load every mapped sound at startup.
    pub preload: bool,
}

/// Camera and decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub facing: Facing,
    pub command: String,
    pub args: Vec<String>,
    pub startup_probe_ms: u64,
    pub video_class_dir: String,
}

/// Audio output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
}

/// Console feedback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedbackConfig {
    pub ttl_ms: u64,
    pub color: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_window_ms: defaults::FRAME_WINDOW_MS,
            debounce_ms: defaults::DEBOUNCE_MS,
            max_voices: defaults::MAX_VOICES,
            stagger_ms: defaults::STAGGER_MS,
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            source: defaults::MAPPING_SOURCE.to_string(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            base: ".".to_string(),
            preload: true,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Rear,
            command: defaults::DECODER_COMMAND.to_string(),
            args: defaults::DECODER_ARGS.iter().map(|a| a.to_string()).collect(),
            startup_probe_ms: defaults::STARTUP_PROBE_MS,
            video_class_dir: defaults::VIDEO_CLASS_DIR.to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::OUTPUT_SAMPLE_RATE,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            ttl_ms: defaults::FEEDBACK_TTL_MS,
            color: true,
        }
    }
}

impl PipelineConfig {
    pub fn frame_window(&self) -> Duration {
        Duration::from_millis(self.frame_window_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_voices: self.max_voices,
            stagger: Duration::from_millis(self.stagger_ms),
        }
    }

    /// Settings for [`crate::pipeline::Pipeline`].
    pub fn orchestrator_config(&self) -> orchestrator::PipelineConfig {
        orchestrator::PipelineConfig {
            frame_window: self.frame_window(),
            debounce: self.debounce(),
            scheduler: self.scheduler_config(),
            ..Default::default()
        }
    }
}

impl CaptureConfig {
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            args: self.args.clone(),
            startup_probe: Duration::from_millis(self.startup_probe_ms),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChimeError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ChimeError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file yields defaults; invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(ChimeError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| ChimeError::ConfigInvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        if self.pipeline.frame_window_ms == 0 {
            return Err(invalid("pipeline.frame_window_ms", "must be greater than 0"));
        }
        if self.pipeline.max_voices == 0 {
            return Err(invalid("pipeline.max_voices", "must be at least 1"));
        }
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be greater than 0"));
        }
        if self.capture.command.trim().is_empty() {
            return Err(invalid("capture.command", "must not be empty"));
        }
        if self.mapping.source.trim().is_empty() {
            return Err(invalid("mapping.source", "must not be empty"));
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SCANCHIME_MAPPING → mapping.source
    /// - SCANCHIME_ASSETS → assets.base
    /// - SCANCHIME_FACING → capture.facing
    /// - SCANCHIME_DEBOUNCE_MS → pipeline.debounce_ms
    /// - SCANCHIME_AUDIO_DEVICE → audio.device
    ///
    /// Empty or unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        let var = |name: &str| {
            std::env::var(format!("{}{}", defaults::ENV_PREFIX, name))
                .ok()
                .filter(|v| !v.is_empty())
        };

        if let Some(source) = var("MAPPING") {
            self.mapping.source = source;
        }

        if let Some(base) = var("ASSETS") {
            self.assets.base = base;
        }

        if let Some(facing) = var("FACING") {
            match facing.parse() {
                Ok(facing) => self.capture.facing = facing,
                Err(e) => tracing::warn!("ignoring SCANCHIME_FACING: {}", e),
            }
        }

        if let Some(debounce) = var("DEBOUNCE_MS") {
            match debounce.parse() {
                Ok(ms) => self.pipeline.debounce_ms = ms,
                Err(e) => tracing::warn!("ignoring SCANCHIME_DEBOUNCE_MS: {}", e),
            }
        }

        if let Some(device) = var("AUDIO_DEVICE") {
            self.audio.device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/scanchime/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scanchime")
            .join("config.toml")
    }
}
