//! Capture device discovery and facing-based selection.

use crate::error::DeviceEnumerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Physical orientation of a camera relative to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    #[default]
    Rear,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::Front => Facing::Rear,
            Facing::Rear => Facing::Front,
        }
    }

    /// Label keywords that identify a device with this facing.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Facing::Front => &["front", "user", "selfie", "facetime"],
            Facing::Rear => &["back", "rear", "environment", "world"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Rear => "rear",
        }
    }

    /// Facing implied by a device label, if any keyword matches.
    pub fn from_label(label: &str) -> Option<Facing> {
        let lower = label.to_lowercase();
        [Facing::Rear, Facing::Front]
            .into_iter()
            .find(|facing| facing.keywords().iter().any(|k| lower.contains(k)))
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "front" | "user" => Ok(Facing::Front),
            "rear" | "back" | "environment" => Ok(Facing::Rear),
            other => Err(format!(
                "unknown facing '{}', expected 'front' or 'rear'",
                other
            )),
        }
    }
}

/// One capture device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    /// Platform id, e.g. `/dev/video0`.
    pub id: String,
    /// Human-readable name.
    pub label: String,
}

impl CaptureDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// How the decoder engine should pick its camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceConstraint {
    /// A specific device.
    DeviceId(String),
    /// Any device with the given facing.
    FacingMode(Facing),
}

impl DeviceConstraint {
    pub fn is_device_id(&self) -> bool {
        matches!(self, DeviceConstraint::DeviceId(_))
    }
}

impl fmt::Display for DeviceConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConstraint::DeviceId(id) => write!(f, "device {}", id),
            DeviceConstraint::FacingMode(facing) => write!(f, "facing mode {}", facing),
        }
    }
}

/// Pick a constraint for `facing` from the enumerated devices.
///
/// Keyword match on the label first, then position among labeled devices
/// (last for rear, first for front). Unlabeled devices cannot be told apart,
/// so a list without labels yields a facing-mode constraint.
pub fn select_device(devices: &[CaptureDevice], facing: Facing) -> DeviceConstraint {
    let labeled: Vec<&CaptureDevice> = devices
        .iter()
        .filter(|d| !d.label.trim().is_empty())
        .collect();

    let keyword_match = labeled.iter().find(|d| {
        let label = d.label.to_lowercase();
        facing.keywords().iter().any(|k| label.contains(k))
    });

    let chosen = keyword_match.or_else(|| match facing {
        Facing::Rear => labeled.last(),
        Facing::Front => labeled.first(),
    });

    match chosen {
        Some(device) => DeviceConstraint::DeviceId(device.id.clone()),
        None => DeviceConstraint::FacingMode(facing),
    }
}

/// Lists the capture devices currently available.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<CaptureDevice>, DeviceEnumerationError>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "enumerator"
    }
}

/// Video4Linux enumerator reading `<class_dir>/videoN/name`.
#[derive(Debug, Clone)]
pub struct V4l2Enumerator {
    class_dir: PathBuf,
}

impl V4l2Enumerator {
    pub fn new(class_dir: impl AsRef<Path>) -> Self {
        Self {
            class_dir: class_dir.as_ref().to_path_buf(),
        }
    }
}

impl Default for V4l2Enumerator {
    fn default() -> Self {
        Self::new(crate::defaults::VIDEO_CLASS_DIR)
    }
}

#[async_trait]
impl DeviceEnumerator for V4l2Enumerator {
    async fn enumerate(&self) -> Result<Vec<CaptureDevice>, DeviceEnumerationError> {
        let mut dir = match tokio::fs::read_dir(&self.class_dir).await {
            Ok(dir) => dir,
            // No video class at all means no cameras, not a failure
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DeviceEnumerationError {
                    message: format!("{}: {}", self.class_dir.display(), e),
                });
            }
        };

        let mut found: Vec<(u32, CaptureDevice)> = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(DeviceEnumerationError {
                        message: format!("{}: {}", self.class_dir.display(), e),
                    });
                }
            };
            let node = entry.file_name().to_string_lossy().to_string();
            let Some(index) = node
                .strip_prefix("video")
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let label = tokio::fs::read_to_string(entry.path().join("name"))
                .await
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            found.push((index, CaptureDevice::new(format!("/dev/{}", node), label)));
        }

        found.sort_by_key(|(index, _)| *index);
        Ok(found.into_iter().map(|(_, device)| device).collect())
    }

    fn name(&self) -> &'static str {
        "v4l2"
    }
}

/// Enumerator returning a fixed list (for testing and configured setups).
#[derive(Debug, Clone, Default)]
pub struct StaticEnumerator {
    devices: Vec<CaptureDevice>,
    should_fail: bool,
}

impl StaticEnumerator {
    pub fn new(devices: Vec<CaptureDevice>) -> Self {
        Self {
            devices,
            should_fail: false,
        }
    }

    /// Every call fails with `DeviceEnumerationError`.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

#[async_trait]
impl DeviceEnumerator for StaticEnumerator {
    async fn enumerate(&self) -> Result<Vec<CaptureDevice>, DeviceEnumerationError> {
        if self.should_fail {
            return Err(DeviceEnumerationError {
                message: "static enumerator failure".to_string(),
            });
        }
        Ok(self.devices.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
