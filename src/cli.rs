//! Command-line interface for scanchime
//!
//! Provides argument parsing using clap derive macros.

use crate::capture::device::Facing;
use crate::console::parse_duration;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Play a figure's sound when its code is scanned
#[derive(Parser, Debug)]
#[command(
    name = "scanchime",
    version,
    about = "Play a figure's sound when its code is scanned"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Mapping document (file path or http(s) URL)
    #[arg(long, value_name = "SOURCE")]
    pub mapping: Option<String>,

    /// Base directory or URL for sound assets
    #[arg(long, value_name = "BASE")]
    pub assets: Option<String>,

    /// Initial camera facing (front, rear)
    #[arg(long, value_name = "FACING")]
    pub facing: Option<Facing>,

    /// Debounce interval per code. Examples: 250ms, 1s
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub debounce: Option<Duration>,

    /// Audio output device
    #[arg(long, value_name = "DEVICE")]
    pub audio_device: Option<String>,

    /// Start scanning immediately instead of waiting for `start`
    #[arg(long)]
    pub auto_start: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan and play (default)
    Run,

    /// List capture devices and audio outputs
    Devices,

    /// Validate a mapping document and load every sound it references
    Check {
        /// Mapping document (default: configured source)
        mapping: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}
