//! Data types that flow between the pipeline stations.

use crate::error::AssetLoadError;
use crate::mapping::FigureRecord;
use std::sync::Arc;
use tokio::time::Instant;

/// Decode events collected over one aggregation window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw decoded strings in arrival order (trimmed, never empty).
    pub codes: Vec<String>,
    /// Sequence number for ordering.
    pub sequence: u64,
    /// When the window closed.
    pub flushed_at: Instant,
}

impl Frame {
    pub fn new(codes: Vec<String>, sequence: u64, flushed_at: Instant) -> Self {
        Self {
            codes,
            sequence,
            flushed_at,
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Outcome of admission for one batch.
#[derive(Debug, Clone, Default)]
pub struct Admission {
    /// Records that won a voice, in decode order.
    pub admitted: Vec<Arc<FigureRecord>>,
    /// Distinct codes with no figure record.
    pub unknown: usize,
    /// Known codes rejected by the debounce interval.
    pub debounced: usize,
    /// Accepted codes dropped by the voice cap.
    pub overflow: usize,
}

impl Admission {
    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Ids of admitted records, in admission order.
    pub fn ids(&self) -> Vec<&str> {
        self.admitted.iter().map(|r| r.id.as_str()).collect()
    }
}

/// What happened to the admitted voices of one batch.
#[derive(Debug, Clone, Default)]
pub struct PlaybackReport {
    /// Ids whose voice was scheduled, in admission order. Skipped voices are
    /// absent; the rest keep their relative order.
    pub played: Vec<String>,
    /// Assets that failed to load; their voices were skipped.
    pub asset_failures: Vec<AssetLoadError>,
    /// Voices whose playback primitive failed.
    pub playback_failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len() {
        let frame = Frame::new(vec!["a".into(), "b".into()], 3, Instant::now());
        assert_eq!(frame.len(), 2);
        assert!(!frame.is_empty());
        assert_eq!(frame.sequence, 3);
    }

    #[test]
    fn test_admission_ids() {
        let record = Arc::new(FigureRecord {
            id: "qr-001".into(),
            label: "Lion".into(),
            role: "Animal".into(),
            sound_ref: "lion.mp3".into(),
        });
        let admission = Admission {
            admitted: vec![record],
            ..Default::default()
        };
        assert_eq!(admission.ids(), vec!["qr-001"]);
        assert!(Admission::default().is_empty());
    }
}
