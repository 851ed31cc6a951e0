//! Monitor command implementation.
//!
//! Connects once and streams every reading update pushed by the probe. Complete
//! readings are saved to the reading log by the session; the command only
//! reports on them. Ctrl+C (also while connecting), `--count` or a lost link
//! ends the stream, and the session is always torn down before returning.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use neerscan_core::{BtleCentral, DeviceSession, EventReceiver, SessionEvent, SessionState};
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::OutputFormat;
use crate::config::{Config, resolve_device};
use crate::format::{FormatOptions, format_monitor_line, format_reading_json};
use crate::style;
use crate::util::{
    OutputWriter, open_central, open_log, require_device_interactive, session_builder,
};

/// Arguments for the monitor command.
pub struct MonitorArgs<'a> {
    pub device: Option<String>,
    pub count: u32,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
    pub config: &'a Config,
}

pub async fn cmd_monitor(args: MonitorArgs<'_>) -> Result<()> {
    let central = open_central(args.config).await?;
    let log = open_log(&args.config.db_path())?;
    let session = session_builder(central, args.config)
        .sink(Arc::new(log))
        .build()
        .context("Invalid session configuration")?;

    let result = run(&session, args).await;
    session.close().await;
    result
}

async fn run(session: &DeviceSession<BtleCentral>, args: MonitorArgs<'_>) -> Result<()> {
    let MonitorArgs {
        device,
        count,
        format,
        output,
        quiet,
        opts,
        config,
    } = args;

    let identifier = require_device_interactive(resolve_device(device, config), session).await?;
    let mut writer = OutputWriter::open(output)?;
    let events = session.events();

    let spinner = if !quiet && io::stderr().is_terminal() {
        Some(style::connecting_spinner(&identifier))
    } else {
        None
    };
    let connect = session.connect(&identifier);
    tokio::pin!(connect);
    let interrupted = tokio::select! {
        result = &mut connect => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }
    let Some(connected) = interrupted else {
        eprintln!("\nShutting down...");
        // close() abandons the pending connect; drive it so the link is released.
        let (_, ()) = tokio::join!(connect, session.close());
        return Ok(());
    };
    connected.with_context(|| {
        format!(
            "Failed to connect to device: {}\n\n\
             Possible causes:\n  \
             - Bluetooth may be disabled -- check system settings\n  \
             - Device may be out of range -- try moving closer\n  \
             - Device may be connected to another host\n  \
             - Device identifier may be incorrect -- run 'neerscan scan' to verify",
            identifier
        )
    })?;

    if !quiet {
        let header = if opts.no_color {
            format!("Monitoring: {}", identifier)
        } else {
            format!("Monitoring: {}", identifier.cyan())
        };
        eprintln!("{}", header);
        if count > 0 {
            eprintln!("Stopping after {} saved readings | Press Ctrl+C to stop", count);
        } else {
            eprintln!("Press Ctrl+C to stop");
        }
        eprintln!("{}", "-".repeat(50));
    }

    let line_opts = opts.with_compact(true);
    stream(session, events, &mut writer, count, format, quiet, &line_opts).await
}

async fn stream(
    session: &DeviceSession<BtleCentral>,
    mut events: EventReceiver,
    writer: &mut OutputWriter,
    count: u32,
    format: OutputFormat,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let mut saved: u32 = 0;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                return Ok(());
            }
            event = events.recv() => event,
        };

        match event {
            Ok(SessionEvent::Reading { reading, verdict }) => {
                let content = match format {
                    OutputFormat::Json => format_reading_json(&reading, &verdict, opts)?,
                    OutputFormat::Text => format_monitor_line(&reading, &verdict, opts),
                };
                writer.write(&content)?;
            }
            Ok(SessionEvent::Persisted { .. }) => {
                saved += 1;
                if !quiet {
                    eprintln!(
                        "{}",
                        style::format_success(&format!("Saved reading #{}", saved), opts.no_color)
                    );
                }
                if count > 0 && saved >= count {
                    if !quiet {
                        eprintln!("Completed {} readings.", saved);
                    }
                    return Ok(());
                }
            }
            Ok(SessionEvent::PersistenceFailed { error }) => {
                eprintln!(
                    "{}",
                    style::format_warning(
                        &format!("Failed to save reading: {}", error),
                        opts.no_color
                    )
                );
            }
            Ok(SessionEvent::GraceElapsed) => {
                if !quiet && !session.snapshot().reading.has_data() {
                    eprintln!(
                        "{}",
                        style::format_warning(
                            "No data received yet. Check that the probe is powered and submerged.",
                            opts.no_color
                        )
                    );
                }
            }
            Ok(SessionEvent::LocationResolved { location }) => {
                if !quiet {
                    eprintln!("Location: {}", location);
                }
            }
            Ok(SessionEvent::StateChanged {
                state: SessionState::Error,
                error,
            }) => {
                bail!(
                    "Connection lost: {}",
                    error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Output fell behind, skipped {} session events", skipped);
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
