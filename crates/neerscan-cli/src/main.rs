//! `neerscan`: command-line interface for NeerScan water-quality probes.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby NeerScan devices |
//! | `monitor` | Stream classified readings and save complete ones |
//! | `history` | Show saved readings |
//! | `classify` | Classify values without a device |
//! | `config` | Manage the configuration file |
//! | `completions` | Generate shell completions |
//!
//! Configuration lives in `~/.config/neerscan/config.toml` (or platform
//! equivalent). `NEERSCAN_DEVICE` sets the default device and `NO_COLOR`
//! disables colored output.

mod cli;
mod commands;
mod config;
mod format;
mod style;
mod util;

use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{ClassifyArgs, MonitorArgs};
use crate::config::Config;
use crate::format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "neerscan", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so JSON on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let no_color = cli.no_color || config.no_color || cli.output.is_some();
    let opts = FormatOptions::new(no_color);
    let output = cli.output.as_ref();

    match cli.command {
        Commands::Scan { timeout, output: out } => {
            commands::cmd_scan(timeout, out.format, output, cli.quiet, &opts, &config).await?;
        }
        Commands::Monitor {
            device,
            count,
            output: out,
        } => {
            commands::cmd_monitor(MonitorArgs {
                device,
                count,
                format: out.format,
                output,
                quiet: cli.quiet,
                opts: &opts,
                config: &config,
            })
            .await?;
        }
        Commands::History { limit, output: out } => {
            commands::cmd_history(limit, out.format, output, &opts, &config)?;
        }
        Commands::Classify {
            ph,
            tds,
            turbidity,
            output: out,
        } => {
            commands::cmd_classify(ClassifyArgs {
                ph,
                tds,
                turbidity,
                format: out.format,
                output,
                opts: &opts,
            })?;
        }
        Commands::Config { action } => {
            commands::cmd_config(action, output, no_color, &config)?;
        }
        Commands::Completions { .. } => {
            // Already handled above
        }
    }

    Ok(())
}
