//! History command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_history_json, format_history_text};
use crate::util::{open_log, write_output};

pub fn cmd_history(
    limit: usize,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
    config: &Config,
) -> Result<()> {
    let path = config.db_path();

    // Nothing has been saved yet; don't create an empty database just to read it.
    let (entries, total) = if path.exists() {
        let log = open_log(&path)?;
        let total = log.len().context("Failed to read saved readings")?;
        let entries = if limit == 0 {
            log.entries()
        } else {
            log.recent(limit)
        }
        .context("Failed to read saved readings")?;
        (entries, total)
    } else {
        tracing::debug!("No reading log at {}", path.display());
        (Vec::new(), 0)
    };

    let content = match format {
        OutputFormat::Json => format_history_json(&entries, opts)?,
        OutputFormat::Text => format_history_text(&entries, total, opts),
    };

    write_output(output, &content)
}
