//! Scan command implementation.

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_scan_json, format_scan_text};
use crate::style;
use crate::util::{open_central, session_builder, write_output};

pub async fn cmd_scan(
    timeout: Option<u64>,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
    config: &Config,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(secs) = timeout {
        config.session.scan_window_secs = secs;
    }

    let central = open_central(&config).await?;
    let session = session_builder(central, &config)
        .build()
        .context("Invalid session configuration")?;

    // Show spinner for text output (unless quiet)
    let spinner = if !quiet && format == OutputFormat::Text && io::stderr().is_terminal() {
        Some(style::scanning_spinner(config.session.scan_window_secs))
    } else {
        None
    };

    let result = session.scan().await;

    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }
    session.close().await;

    let devices = result.context("Failed to scan for devices")?;

    let content = match format {
        OutputFormat::Json => format_scan_json(&devices, opts)?,
        OutputFormat::Text => format_scan_text(&devices, opts, !quiet),
    };

    write_output(output, &content)
}
