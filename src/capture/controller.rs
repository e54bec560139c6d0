//! Capture session lifecycle.
//!
//! `Idle -> Starting -> Running -> Stopping -> Idle`, with a failed start
//! falling straight back to Idle. At most one session is live: a start first
//! tears down the running session before it acquires the next device.

use crate::capture::device::{DeviceConstraint, DeviceEnumerator, Facing, select_device};
use crate::capture::engine::{DecodeSink, DecoderEngine, ScanConfig};
use crate::error::CaptureStartError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Starting => "starting",
            CaptureState::Running => "running",
            CaptureState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Snapshot of the controller for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStatus {
    pub state: CaptureState,
    /// Facing of the live session.
    pub facing: Option<Facing>,
    /// Constraint the live session was started with.
    pub constraint: Option<DeviceConstraint>,
}

impl CaptureStatus {
    fn idle() -> Self {
        Self {
            state: CaptureState::Idle,
            facing: None,
            constraint: None,
        }
    }
}

/// Clears the toggle flag when the toggle finishes, however it finishes.
struct ToggleGuard<'a>(&'a AtomicBool);

impl Drop for ToggleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CaptureController {
    enumerator: Arc<dyn DeviceEnumerator>,
    engine: Arc<dyn DecoderEngine>,
    scan_config: ScanConfig,
    decode_output: mpsc::Sender<String>,
    /// Gate read by every `DecodeSink`; true only while Running.
    running: Arc<AtomicBool>,
    status: RwLock<CaptureStatus>,
    /// Facing most recently asked for, used to toggle from Idle.
    requested: RwLock<Facing>,
    /// Serializes start/stop so sessions never overlap.
    lifecycle: tokio::sync::Mutex<()>,
    toggling: AtomicBool,
}

impl CaptureController {
    pub fn new(
        enumerator: Arc<dyn DeviceEnumerator>,
        engine: Arc<dyn DecoderEngine>,
        scan_config: ScanConfig,
        decode_output: mpsc::Sender<String>,
        initial_facing: Facing,
    ) -> Self {
        Self {
            enumerator,
            engine,
            scan_config,
            decode_output,
            running: Arc::new(AtomicBool::new(false)),
            status: RwLock::new(CaptureStatus::idle()),
            requested: RwLock::new(initial_facing),
            lifecycle: tokio::sync::Mutex::new(()),
            toggling: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| CaptureStatus::idle())
    }

    pub fn state(&self) -> CaptureState {
        self.status().state
    }

    /// Facing of the live session, if any.
    pub fn facing(&self) -> Option<Facing> {
        self.status().facing
    }

    /// True while a facing toggle is in flight.
    pub fn is_toggling(&self) -> bool {
        self.toggling.load(Ordering::Acquire)
    }

    fn set_status(&self, status: CaptureStatus) {
        tracing::info!(state = %status.state, "capture state");
        match self.status.write() {
            Ok(mut s) => *s = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    fn set_state(&self, state: CaptureState) {
        let mut status = self.status();
        status.state = state;
        if state == CaptureState::Idle {
            status.facing = None;
            status.constraint = None;
        }
        self.set_status(status);
    }

    fn sink(&self) -> DecodeSink {
        DecodeSink::new(self.decode_output.clone(), Arc::clone(&self.running))
    }

    /// Start scanning with the camera facing `facing`.
    ///
    /// A device-id start that fails is retried once with a facing-mode
    /// constraint. Returns the constraint the live session uses.
    pub async fn start(&self, facing: Facing) -> Result<DeviceConstraint, CaptureStartError> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Ok(mut requested) = self.requested.write() {
            *requested = facing;
        }

        self.teardown().await;
        self.set_state(CaptureState::Starting);

        let constraint = match self.enumerator.enumerate().await {
            Ok(devices) => {
                let constraint = select_device(&devices, facing);
                tracing::info!(
                    devices = devices.len(),
                    %facing,
                    %constraint,
                    "capture device selected"
                );
                constraint
            }
            Err(e) => {
                tracing::warn!("{}, using facing mode", e);
                DeviceConstraint::FacingMode(facing)
            }
        };

        let first = self
            .engine
            .start(&constraint, &self.scan_config, self.sink())
            .await;
        let started = match first {
            Ok(()) => Ok(constraint),
            Err(e) if constraint.is_device_id() => {
                tracing::warn!("{}, retrying with facing mode {}", e, facing);
                let fallback = DeviceConstraint::FacingMode(facing);
                self.engine
                    .start(&fallback, &self.scan_config, self.sink())
                    .await
                    .map(|()| fallback)
            }
            Err(e) => Err(e),
        };

        match started {
            Ok(constraint) => {
                self.running.store(true, Ordering::Release);
                self.set_status(CaptureStatus {
                    state: CaptureState::Running,
                    facing: Some(facing),
                    constraint: Some(constraint.clone()),
                });
                Ok(constraint)
            }
            Err(e) => {
                self.engine.clear().await;
                self.set_state(CaptureState::Idle);
                Err(e)
            }
        }
    }

    /// Restart with the opposite facing.
    ///
    /// Rejected with `ToggleInProgress` while a previous toggle is still
    /// running. Returns the new facing.
    pub async fn toggle_facing(&self) -> Result<Facing, CaptureStartError> {
        if self.toggling.swap(true, Ordering::AcqRel) {
            return Err(CaptureStartError::ToggleInProgress);
        }
        let _guard = ToggleGuard(&self.toggling);

        let current = self.facing().unwrap_or_else(|| {
            self.requested
                .read()
                .map(|r| *r)
                .unwrap_or_default()
        });
        let target = current.opposite();
        self.start(target).await?;
        Ok(target)
    }

    /// Stop the live session, if any.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
    }

    /// Stopping -> Idle for a running session. Caller holds `lifecycle`.
    async fn teardown(&self) {
        if self.state() != CaptureState::Running {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.set_state(CaptureState::Stopping);
        if let Err(e) = self.engine.stop().await {
            tracing::warn!("decoder stop failed: {}", e);
        }
        self.engine.clear().await;
        self.set_state(CaptureState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::{CaptureDevice, StaticEnumerator};
    use crate::capture::engine::MockEngine;
    use std::time::Duration;

    fn controller(
        devices: Vec<CaptureDevice>,
        engine: MockEngine,
    ) -> (Arc<CaptureController>, Arc<MockEngine>, mpsc::Receiver<String>) {
        controller_with(StaticEnumerator::new(devices), engine)
    }

    fn controller_with(
        enumerator: StaticEnumerator,
        engine: MockEngine,
    ) -> (Arc<CaptureController>, Arc<MockEngine>, mpsc::Receiver<String>) {
        let engine = Arc::new(engine);
        let (tx, rx) = mpsc::channel(16);
        let controller = CaptureController::new(
            Arc::new(enumerator),
            engine.clone(),
            ScanConfig::default(),
            tx,
            Facing::Rear,
        );
        (Arc::new(controller), engine, rx)
    }

    fn cameras() -> Vec<CaptureDevice> {
        vec![
            CaptureDevice::new("/dev/video0", "Front Camera"),
            CaptureDevice::new("/dev/video1", "Back Camera"),
        ]
    }

    #[tokio::test]
    async fn test_start_selects_device_and_runs() {
        let (controller, engine, _rx) = controller(cameras(), MockEngine::new());

        let constraint = controller.start(Facing::Rear).await.unwrap();

        assert_eq!(constraint, DeviceConstraint::DeviceId("/dev/video1".into()));
        assert_eq!(controller.state(), CaptureState::Running);
        assert_eq!(controller.facing(), Some(Facing::Rear));
        assert_eq!(engine.live_sessions(), 1);
    }

    #[tokio::test]
    async fn test_no_devices_starts_with_facing_mode() {
        let (controller, engine, _rx) = controller(Vec::new(), MockEngine::new());

        let constraint = controller.start(Facing::Rear).await.unwrap();

        assert_eq!(constraint, DeviceConstraint::FacingMode(Facing::Rear));
        assert_eq!(engine.starts(), vec![DeviceConstraint::FacingMode(Facing::Rear)]);
        assert_eq!(controller.state(), CaptureState::Running);
    }

    #[tokio::test]
    async fn test_enumeration_failure_falls_back_to_facing_mode() {
        let (controller, engine, _rx) =
            controller_with(StaticEnumerator::default().with_failure(), MockEngine::new());

        let constraint = controller.start(Facing::Front).await.unwrap();

        assert_eq!(constraint, DeviceConstraint::FacingMode(Facing::Front));
        assert_eq!(engine.starts().len(), 1);
    }

    #[tokio::test]
    async fn test_device_id_failure_retries_once_with_facing_mode() {
        let (controller, engine, _rx) =
            controller(cameras(), MockEngine::new().with_device_id_failure());

        let constraint = controller.start(Facing::Rear).await.unwrap();

        assert_eq!(constraint, DeviceConstraint::FacingMode(Facing::Rear));
        assert_eq!(
            engine.starts(),
            vec![
                DeviceConstraint::DeviceId("/dev/video1".into()),
                DeviceConstraint::FacingMode(Facing::Rear),
            ]
        );
        assert_eq!(controller.state(), CaptureState::Running);
    }

    #[tokio::test]
    async fn test_fallback_failure_leaves_idle() {
        let engine = MockEngine::new()
            .with_device_id_failure()
            .with_facing_mode_failure();
        let (controller, engine, _rx) = controller(cameras(), engine);

        let result = controller.start(Facing::Rear).await;

        assert!(matches!(result, Err(CaptureStartError::Engine { .. })));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(controller.facing(), None);
        assert_eq!(engine.starts().len(), 2);
    }

    #[tokio::test]
    async fn test_facing_mode_failure_is_not_retried() {
        let (controller, engine, _rx) =
            controller(Vec::new(), MockEngine::new().with_facing_mode_failure());

        assert!(controller.start(Facing::Rear).await.is_err());
        assert_eq!(engine.starts().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_tears_down_previous_session_first() {
        let (controller, engine, _rx) = controller(cameras(), MockEngine::new());

        controller.start(Facing::Rear).await.unwrap();
        controller.start(Facing::Front).await.unwrap();

        assert_eq!(engine.stop_count(), 1);
        assert_eq!(engine.live_sessions(), 1);
        assert_eq!(engine.max_live_sessions(), 1);
        assert_eq!(controller.facing(), Some(Facing::Front));
    }

    #[tokio::test]
    async fn test_decode_events_only_while_running() {
        let (controller, engine, mut rx) = controller(cameras(), MockEngine::new());

        controller.start(Facing::Rear).await.unwrap();
        assert!(engine.emit("qr-001"));
        assert_eq!(rx.recv().await.unwrap(), "qr-001");

        controller.stop().await;
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(!engine.emit("qr-002"));
    }

    #[tokio::test]
    async fn test_toggle_flips_facing() {
        let (controller, _engine, _rx) = controller(cameras(), MockEngine::new());

        controller.start(Facing::Rear).await.unwrap();
        assert_eq!(controller.toggle_facing().await.unwrap(), Facing::Front);
        assert_eq!(controller.facing(), Some(Facing::Front));
        assert_eq!(controller.toggle_facing().await.unwrap(), Facing::Rear);
    }

    #[tokio::test]
    async fn test_toggle_from_idle_uses_requested_facing() {
        let (controller, _engine, _rx) = controller(cameras(), MockEngine::new());

        // Initial preference is rear
        assert_eq!(controller.toggle_facing().await.unwrap(), Facing::Front);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_toggle_is_rejected() {
        let engine = MockEngine::new().with_start_delay(Duration::from_millis(100));
        let (controller, engine, _rx) = controller(cameras(), engine);
        controller.start(Facing::Rear).await.unwrap();

        let first = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.toggle_facing().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(controller.is_toggling());

        let second = controller.toggle_facing().await;
        assert!(matches!(second, Err(CaptureStartError::ToggleInProgress)));

        assert_eq!(first.await.unwrap().unwrap(), Facing::Front);
        assert!(!controller.is_toggling());
        assert_eq!(engine.max_live_sessions(), 1);
    }

    #[tokio::test]
    async fn test_failed_toggle_reenables_toggle() {
        let engine = MockEngine::new()
            .with_device_id_failure()
            .with_facing_mode_failure();
        let (controller, _engine, _rx) = controller(cameras(), engine);

        assert!(controller.toggle_facing().await.is_err());
        assert!(!controller.is_toggling());
        assert!(matches!(
            controller.toggle_facing().await,
            Err(CaptureStartError::Engine { .. })
        ));
    }
}
