//! Command-Line Interface

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::capture::types::EventKind;
use crate::codec::FormatVersion;

/// Input Audit - record global input events into fixed-width binary logs
#[derive(Parser, Debug)]
#[command(name = "input-audit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture input events until stopped
    Record {
        /// Recording duration in seconds (0 = until Ctrl-C)
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Feed generated events at RATE per second instead of the host tap
        #[arg(short, long, value_name = "RATE")]
        synthetic: Option<f64>,

        /// Directory for log files (overrides storage.log_dir)
        #[arg(short, long)]
        log_dir: Option<PathBuf>,
    },

    /// Print the records of a log directory
    Dump {
        /// Log directory
        dir: PathBuf,

        /// Only this table
        #[arg(short, long, value_enum)]
        table: Option<TableArg>,

        /// Emit one JSON object per line
        #[arg(long)]
        json: bool,

        /// Refuse files not stored in this format version
        #[arg(long, value_name = "N")]
        as_version: Option<u8>,
    },

    /// Reconstruct typed text from key-down records
    Keys {
        /// Log directory
        dir: PathBuf,
    },

    /// Summarize every log file in a directory
    Info {
        /// Log directory
        dir: PathBuf,
    },

    /// Initialize configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// View or reset configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Get a specific configuration value
    Get {
        /// Configuration key (e.g., "writer.batch_size")
        key: String,
    },

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableArg {
    Mouse,
    Key,
    Wheel,
}

impl From<TableArg> for EventKind {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Mouse => EventKind::Mouse,
            TableArg::Key => EventKind::Key,
            TableArg::Wheel => EventKind::Wheel,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// `--as-version` argument as a format version
pub fn declared_version(n: u8) -> Result<FormatVersion, crate::Error> {
    FormatVersion::from_tag(n).ok_or_else(|| crate::Error::Config(format!("unknown format version {}", n)))
}
