//! Operator console: line commands on stdin.
//!
//! `start` is the user gesture that begins scanning; `flip` toggles the camera;
//! `debounce <duration>` retunes the scheduler while it runs.

use crate::capture::controller::CaptureController;
use crate::capture::device::Facing;
use crate::error::CaptureStartError;
use crate::pipeline::scheduler::DebounceControl;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Commands typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start scanning with the preferred facing
    Start,
    /// Switch to the opposite camera
    Flip,
    /// Stop scanning
    Stop,
    /// Change the debounce interval
    Debounce(Duration),
    /// Show capture state and tuning
    Status,
    /// List commands
    Help,
    /// Leave
    Quit,
}

impl Command {
    /// Whether the command suspends on the camera and should not block the prompt.
    pub fn is_capture_start(&self) -> bool {
        matches!(self, Command::Start | Command::Flip)
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let verb = words.next().unwrap_or("").to_lowercase();
        let arg = words.next();
        match (verb.as_str(), arg) {
            ("start", None) => Ok(Command::Start),
            ("flip" | "toggle", None) => Ok(Command::Flip),
            ("stop", None) => Ok(Command::Stop),
            ("status", None) => Ok(Command::Status),
            ("help" | "?", None) => Ok(Command::Help),
            ("quit" | "exit", None) => Ok(Command::Quit),
            ("debounce", Some(value)) => parse_duration(value)
                .map(Command::Debounce)
                .map_err(|e| format!("invalid duration '{}': {}", value, e)),
            ("debounce", None) => Err("usage: debounce <duration>".to_string()),
            ("", _) => Err("empty command".to_string()),
            (other, _) => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command succeeded
    Ok { message: String },
    /// Error occurred
    Error { message: String },
    /// Operator asked to leave
    Quit,
}

impl Response {
    fn ok(message: impl Into<String>) -> Self {
        Response::Ok {
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

/// Parse a duration string.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`250ms`, `1s`, `1s500ms`).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

const HELP: &str = "commands: start | flip | stop | debounce <duration> | status | quit";

/// Executes console commands against the capture controller.
#[derive(Clone)]
pub struct CommandHandler {
    controller: Arc<CaptureController>,
    debounce: DebounceControl,
    preferred: Facing,
}

impl CommandHandler {
    pub fn new(controller: Arc<CaptureController>, debounce: DebounceControl, preferred: Facing) -> Self {
        Self {
            controller,
            debounce,
            preferred,
        }
    }

    pub async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Start => match self.controller.start(self.preferred).await {
                Ok(constraint) => Response::ok(format!("scanning ({})", constraint)),
                Err(e) => Response::error(e.to_string()),
            },
            Command::Flip => match self.controller.toggle_facing().await {
                Ok(facing) => Response::ok(format!("switched to {} camera", facing)),
                Err(CaptureStartError::ToggleInProgress) => {
                    Response::error("camera switch already in progress")
                }
                Err(e) => Response::error(e.to_string()),
            },
            Command::Stop => {
                self.controller.stop().await;
                Response::ok("stopped")
            }
            Command::Debounce(interval) => {
                self.debounce.set(interval);
                Response::ok(format!(
                    "debounce set to {}",
                    humantime::format_duration(interval)
                ))
            }
            Command::Status => Response::ok(self.status_line()),
            Command::Help => Response::ok(HELP),
            Command::Quit => Response::Quit,
        }
    }

    pub fn status_line(&self) -> String {
        let status = self.controller.status();
        let facing = status
            .facing
            .map(|f| f.to_string())
            .unwrap_or_else(|| "-".to_string());
        let device = status
            .constraint
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "state: {}, facing: {}, device: {}, debounce: {}",
            status.state,
            facing,
            device,
            humantime::format_duration(self.debounce.get())
        )
    }

    /// Read commands from `input` until `quit` or end of input, writing one
    /// reply line per command to `output`.
    ///
    /// Capture starts run on their own task so the prompt stays responsive and
    /// an overlapping `flip` is rejected instead of queued.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Response>();
        let mut lines = input.lines();

        loop {
            tokio::select! {
                Some(reply) = reply_rx.recv() => {
                    write_response(&mut output, &reply).await?;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let command = match line.parse::<Command>() {
                        Ok(command) => command,
                        Err(message) => {
                            write_response(&mut output, &Response::error(message)).await?;
                            continue;
                        }
                    };
                    if command.is_capture_start() {
                        let handler = self.clone();
                        let reply_tx = reply_tx.clone();
                        tokio::spawn(async move {
                            let _ = reply_tx.send(handler.handle(command).await);
                        });
                        continue;
                    }
                    let response = self.handle(command).await;
                    write_response(&mut output, &response).await?;
                    if response == Response::Quit {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

async fn write_response<W: AsyncWrite + Unpin>(output: &mut W, response: &Response) -> std::io::Result<()> {
    let line = match response {
        Response::Ok { message } => format!("{}\n", message),
        Response::Error { message } => format!("error: {}\n", message),
        Response::Quit => "bye\n".to_string(),
    };
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}
