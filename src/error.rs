//! Error types for scanchime.

use thiserror::Error;

/// The mapping document could not be loaded. Fatal to boot.
#[derive(Error, Debug)]
pub enum MappingLoadError {
    #[error("Mapping source unreachable at {source_ref}: {message}")]
    Unreachable { source_ref: String, message: String },

    #[error("Mapping source {source_ref} is malformed: {message}")]
    Malformed { source_ref: String, message: String },
}

/// A single sound asset failed to fetch or decode.
///
/// Cloneable because every caller awaiting the same in-flight load receives it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetLoadError {
    #[error("Failed to fetch asset {asset}: {message}")]
    Fetch { asset: String, message: String },

    #[error("Failed to decode asset {asset}: {message}")]
    Decode { asset: String, message: String },
}

impl AssetLoadError {
    /// The asset reference this failure belongs to.
    pub fn asset(&self) -> &str {
        match self {
            AssetLoadError::Fetch { asset, .. } | AssetLoadError::Decode { asset, .. } => asset,
        }
    }
}

/// Capture device listing failed.
#[derive(Error, Debug)]
#[error("Capture device enumeration failed: {message}")]
pub struct DeviceEnumerationError {
    pub message: String,
}

/// The decoder engine could not be started, even after the facing-mode fallback.
#[derive(Error, Debug)]
pub enum CaptureStartError {
    #[error("Decoder engine failed to start with {constraint}: {message}")]
    Engine { constraint: String, message: String },

    #[error("A facing toggle is already in progress")]
    ToggleInProgress,
}

/// A scheduled voice failed to start audibly.
#[derive(Error, Debug, Clone)]
pub enum PlaybackError {
    #[error("Audio output device unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error("Invalid audio buffer for {asset}: {message}")]
    InvalidBuffer { asset: String, message: String },

    #[error("Playback failed: {message}")]
    Failed { message: String },
}

#[derive(Error, Debug)]
pub enum ChimeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Pipeline errors
    #[error(transparent)]
    MappingLoad(#[from] MappingLoadError),

    #[error(transparent)]
    AssetLoad(#[from] AssetLoadError),

    #[error(transparent)]
    DeviceEnumeration(#[from] DeviceEnumerationError),

    #[error(transparent)]
    CaptureStart(#[from] CaptureStartError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ChimeError>;
