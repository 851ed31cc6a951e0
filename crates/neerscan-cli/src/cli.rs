//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable output format arguments
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser)]
#[command(name = "neerscan")]
#[command(author, version, about = "CLI for NeerScan water-quality sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR", value_parser = FalseyValueParser::new())]
    pub no_color: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby NeerScan devices
    Scan {
        /// Scan timeout in seconds (defaults to the configured scan window)
        #[arg(short, long)]
        timeout: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Connect to a device and stream classified readings
    Monitor {
        /// Device identifier (MAC address or UUID), or use NEERSCAN_DEVICE env var
        #[arg(short, long, env = "NEERSCAN_DEVICE")]
        device: Option<String>,

        /// Stop after this many readings have been saved (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show saved readings
    History {
        /// Number of most recent entries to show (0 for all)
        #[arg(short, long, default_value = "0")]
        limit: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Classify a set of values without a device
    Classify {
        /// pH value
        #[arg(long, allow_negative_numbers = true, value_parser = finite_number)]
        ph: Option<f64>,

        /// Total dissolved solids in ppm
        #[arg(long, value_parser = finite_number)]
        tds: Option<f64>,

        /// Turbidity in NTU
        #[arg(long, allow_negative_numbers = true, value_parser = finite_number)]
        turbidity: Option<f64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// Default device identifier
    Device,
    /// Disable colored output
    NoColor,
    /// Reading log database path
    DbPath,
    /// Fixed latitude for location stamps
    Latitude,
    /// Fixed longitude for location stamps
    Longitude,
    /// Scan window in seconds
    ScanWindow,
    /// Connect timeout in seconds
    ConnectTimeout,
}

/// Configuration subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Show configuration file path
    Path,

    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        #[arg(value_enum)]
        key: ConfigKey,
        /// Configuration value
        #[arg(allow_negative_numbers = true)]
        value: String,
    },

    /// Unset (reset) a configuration value
    Unset {
        /// Configuration key to reset
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse a measurement, rejecting NaN and infinities.
fn finite_number(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("{s} is not a finite number"))
    }
}
