//! External decoder engine interface.
//!
//! The engine owns the camera while it runs and reports every recognized
//! code through a [`DecodeSink`], once per video frame the code is visible in.

use crate::capture::device::DeviceConstraint;
use crate::defaults;
use crate::error::CaptureStartError;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Per-start engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Extra arguments passed to the decoder before the device.
    pub args: Vec<String>,
    /// How long a fresh engine must stay alive to count as started.
    pub startup_probe: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            args: defaults::DECODER_ARGS.iter().map(|a| a.to_string()).collect(),
            startup_probe: Duration::from_millis(defaults::STARTUP_PROBE_MS),
        }
    }
}

/// The engine's `on_decoded` / `on_error` callback pair.
///
/// Codes are forwarded only while the owning controller reports Running.
#[derive(Debug, Clone)]
pub struct DecodeSink {
    output: mpsc::Sender<String>,
    running: Arc<AtomicBool>,
}

impl DecodeSink {
    pub fn new(output: mpsc::Sender<String>, running: Arc<AtomicBool>) -> Self {
        Self { output, running }
    }

    /// Forward one decoded code. Returns `false` when it was dropped.
    pub fn on_decoded(&self, code: &str) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        match self.output.try_send(code.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("decode channel full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn on_error(&self, message: &str) {
        tracing::warn!("decoder: {}", message);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A decoding engine bound to one camera at a time.
#[async_trait]
pub trait DecoderEngine: Send + Sync {
    /// Acquire the device matching `constraint` and begin decoding into `sink`.
    async fn start(
        &self,
        constraint: &DeviceConstraint,
        config: &ScanConfig,
        sink: DecodeSink,
    ) -> Result<(), CaptureStartError>;

    /// Stop decoding.
    async fn stop(&self) -> Result<(), String>;

    /// Release everything held by the last session.
    async fn clear(&self);

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "engine"
    }
}

struct RunningDecoder {
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

/// Runs an external decoder command that prints one code per line.
pub struct ProcessEngine {
    command: String,
    current: tokio::sync::Mutex<Option<RunningDecoder>>,
}

impl ProcessEngine {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Command line for a start with `constraint`.
    ///
    /// A device-id constraint names the device; a facing-mode constraint lets
    /// the decoder open its default camera.
    pub fn command_line(&self, constraint: &DeviceConstraint, config: &ScanConfig) -> Vec<String> {
        let mut line = vec![self.command.clone()];
        line.extend(config.args.iter().cloned());
        if let DeviceConstraint::DeviceId(id) = constraint {
            line.push(id.clone());
        }
        line
    }
}

#[async_trait]
impl DecoderEngine for ProcessEngine {
    async fn start(
        &self,
        constraint: &DeviceConstraint,
        config: &ScanConfig,
        sink: DecodeSink,
    ) -> Result<(), CaptureStartError> {
        let failed = |message: String| CaptureStartError::Engine {
            constraint: constraint.to_string(),
            message,
        };

        let line = self.command_line(constraint, config);
        tracing::debug!(command = ?line, "starting decoder");
        let mut child = Command::new(&line[0])
            .args(&line[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("failed to spawn {}: {}", self.command, e)))?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let sink = sink.clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    sink.on_decoded(&line);
                }
            }));
        }
        let last_error = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let last_error = Arc::clone(&last_error);
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    sink.on_error(&line);
                    if let Ok(mut last) = last_error.lock() {
                        *last = line;
                    }
                }
            }));
        }

        // A decoder that cannot open its device exits almost immediately
        tokio::time::sleep(config.startup_probe).await;
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                for reader in &readers {
                    reader.abort();
                }
                let detail = last_error.lock().map(|l| l.clone()).unwrap_or_default();
                let message = if detail.is_empty() {
                    format!("exited during startup ({})", status)
                } else {
                    format!("exited during startup ({}): {}", status, detail)
                };
                return Err(failed(message));
            }
            Err(e) => return Err(failed(format!("failed to poll decoder: {}", e))),
        }

        *self.current.lock().await = Some(RunningDecoder { child, readers });
        Ok(())
    }

    async fn stop(&self) -> Result<(), String> {
        let mut current = self.current.lock().await;
        let Some(running) = current.as_mut() else {
            return Ok(());
        };
        running
            .child
            .kill()
            .await
            .map_err(|e| format!("failed to stop {}: {}", self.command, e))
    }

    async fn clear(&self) {
        if let Some(running) = self.current.lock().await.take() {
            for reader in running.readers {
                reader.abort();
            }
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Scriptable engine (for testing).
///
/// Tracks how many sessions are live so tests can assert that sessions never
/// overlap.
#[derive(Default)]
pub struct MockEngine {
    fail_device_id: bool,
    fail_facing_mode: bool,
    start_delay: Option<Duration>,
    starts: Mutex<Vec<DeviceConstraint>>,
    sink: Mutex<Option<DecodeSink>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
    stops: AtomicUsize,
    clears: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every start that names a specific device.
    pub fn with_device_id_failure(mut self) -> Self {
        self.fail_device_id = true;
        self
    }

    /// Fail every facing-mode start.
    pub fn with_facing_mode_failure(mut self) -> Self {
        self.fail_facing_mode = true;
        self
    }

    /// Suspend inside `start` for `delay`.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Constraints passed to `start`, including failed attempts.
    pub fn starts(&self) -> Vec<DeviceConstraint> {
        self.starts.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Deliver a code as if the camera saw it. Returns whether it was forwarded.
    pub fn emit(&self, code: &str) -> bool {
        let sink = self.sink.lock().ok().and_then(|s| s.clone());
        sink.is_some_and(|sink| sink.on_decoded(code))
    }

    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live sessions observed.
    pub fn max_live_sessions(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecoderEngine for MockEngine {
    async fn start(
        &self,
        constraint: &DeviceConstraint,
        _config: &ScanConfig,
        sink: DecodeSink,
    ) -> Result<(), CaptureStartError> {
        if let Ok(mut starts) = self.starts.lock() {
            starts.push(constraint.clone());
        }
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }

        let fail = match constraint {
            DeviceConstraint::DeviceId(_) => self.fail_device_id,
            DeviceConstraint::FacingMode(_) => self.fail_facing_mode,
        };
        if fail {
            return Err(CaptureStartError::Engine {
                constraint: constraint.to_string(),
                message: "mock start failure".to_string(),
            });
        }

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), String> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        // Saturating: stop on an idle engine is a no-op
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    async fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.sink.lock() {
            *slot = None;
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::Facing;

    fn sink(running: bool) -> (DecodeSink, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        (DecodeSink::new(tx, Arc::new(AtomicBool::new(running))), rx)
    }

    #[tokio::test]
    async fn test_sink_forwards_only_while_running() {
        let running = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel(4);
        let sink = DecodeSink::new(tx, Arc::clone(&running));

        assert!(!sink.on_decoded("qr-001"));
        running.store(true, Ordering::Release);
        assert!(sink.on_decoded("qr-002"));

        assert_eq!(rx.recv().await.unwrap(), "qr-002");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sink_drops_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = DecodeSink::new(tx, Arc::new(AtomicBool::new(true)));
        assert!(sink.on_decoded("a"));
        assert!(!sink.on_decoded("b"));
    }

    #[test]
    fn test_command_line_appends_device_only_for_device_id() {
        let engine = ProcessEngine::new("zbarcam");
        let config = ScanConfig::default();

        assert_eq!(
            engine.command_line(&DeviceConstraint::DeviceId("/dev/video2".into()), &config),
            vec!["zbarcam", "--raw", "--nodisplay", "/dev/video2"]
        );
        assert_eq!(
            engine.command_line(&DeviceConstraint::FacingMode(Facing::Rear), &config),
            vec!["zbarcam", "--raw", "--nodisplay"]
        );
    }

    #[tokio::test]
    async fn test_process_engine_missing_command_fails_to_start() {
        let engine = ProcessEngine::new("/nonexistent/scanchime-decoder");
        let (sink, _rx) = sink(true);

        let result = engine
            .start(
                &DeviceConstraint::FacingMode(Facing::Rear),
                &ScanConfig::default(),
                sink,
            )
            .await;

        assert!(matches!(result, Err(CaptureStartError::Engine { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_engine_early_exit_is_start_failure() {
        let engine = ProcessEngine::new("sh");
        let config = ScanConfig {
            args: vec!["-c".into(), "echo 'no such device' >&2; exit 3".into()],
            startup_probe: Duration::from_millis(300),
        };
        let (sink, _rx) = sink(true);

        let err = engine
            .start(&DeviceConstraint::FacingMode(Facing::Rear), &config, sink)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("exited during startup"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_engine_forwards_stdout_lines() {
        let engine = ProcessEngine::new("sh");
        let config = ScanConfig {
            args: vec!["-c".into(), "echo qr-001; echo qr-002; sleep 5".into()],
            startup_probe: Duration::from_millis(100),
        };
        let (sink, mut rx) = sink(true);

        engine
            .start(&DeviceConstraint::FacingMode(Facing::Rear), &config, sink)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "qr-001");
        assert_eq!(rx.recv().await.unwrap(), "qr-002");

        engine.stop().await.unwrap();
        engine.clear().await;
    }

    #[tokio::test]
    async fn test_mock_engine_tracks_sessions() {
        let engine = MockEngine::new();
        let (sink, mut rx) = sink(true);

        engine
            .start(
                &DeviceConstraint::DeviceId("/dev/video0".into()),
                &ScanConfig::default(),
                sink,
            )
            .await
            .unwrap();
        assert_eq!(engine.live_sessions(), 1);
        assert!(engine.emit("qr-001"));
        assert_eq!(rx.recv().await.unwrap(), "qr-001");

        engine.stop().await.unwrap();
        engine.clear().await;
        assert_eq!(engine.live_sessions(), 0);
        assert!(!engine.emit("qr-002"));
    }

    #[tokio::test]
    async fn test_mock_engine_scripted_failure() {
        let engine = MockEngine::new().with_device_id_failure();
        let (sink, _rx) = sink(true);

        let result = engine
            .start(
                &DeviceConstraint::DeviceId("/dev/video0".into()),
                &ScanConfig::default(),
                sink,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(engine.live_sessions(), 0);
        assert_eq!(engine.starts().len(), 1);
    }
}
