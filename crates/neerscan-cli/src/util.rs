//! Utility functions for CLI operations.

use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;
use neerscan_core::{
    BtleCentral, DeviceDescriptor, DeviceSession, FixedLocation, NoLocation, SessionBuilder,
};
use neerscan_store::{ReadingLog, SqliteStore};

use crate::config::Config;

/// Open the Bluetooth adapter with the configured connect timeout.
pub async fn open_central(config: &Config) -> Result<Arc<BtleCentral>> {
    let central = BtleCentral::new()
        .await
        .context("Failed to open Bluetooth adapter")?
        .connect_timeout(config.session.to_session_config().connect_timeout);
    Ok(Arc::new(central))
}

/// Session builder carrying the configured timings and location source.
pub fn session_builder(central: Arc<BtleCentral>, config: &Config) -> SessionBuilder<BtleCentral> {
    let builder =
        DeviceSession::builder(central).config(config.session.to_session_config());
    match config.location.position() {
        Some(position) => builder.location(FixedLocation(position)),
        None => builder.location(NoLocation),
    }
}

/// Open the reading log at the configured database path.
pub fn open_log(path: &Path) -> Result<ReadingLog<SqliteStore>> {
    let store = SqliteStore::open(path)
        .with_context(|| format!("Failed to open reading log at {}", path.display()))?;
    Ok(ReadingLog::new(store))
}

/// Get device identifier, choosing from a scan when none was given.
///
/// A single match is used directly. Several matches prompt for a choice on an
/// interactive terminal.
pub async fn require_device_interactive(
    device: Option<String>,
    session: &DeviceSession<BtleCentral>,
) -> Result<String> {
    if let Some(dev) = device {
        return Ok(dev);
    }

    eprintln!("No device specified. Scanning for nearby devices...");
    let devices = session
        .scan()
        .await
        .context("Failed to scan for devices")?;

    pick_device(&devices, io::stdin().is_terminal() && io::stderr().is_terminal())
}

fn pick_device(devices: &[DeviceDescriptor], interactive: bool) -> Result<String> {
    match devices {
        [] => bail!(
            "No NeerScan devices found nearby.\n\
             Make sure your device is powered on and in range."
        ),
        [only] => {
            eprintln!("Found 1 device: {}", only);
            Ok(only.id.clone())
        }
        _ if !interactive => bail!(
            "Found {} devices. Use --device <ID> or set NEERSCAN_DEVICE to choose one.\n\
             Run 'neerscan scan' to list them.",
            devices.len()
        ),
        _ => {
            let items: Vec<String> = devices.iter().map(ToString::to_string).collect();
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select a device")
                .items(&items)
                .default(0)
                .interact()
                .context("Failed to get user selection")?;
            Ok(devices[selection].id.clone())
        }
    }
}

/// Destination for command output: a file or stdout.
pub struct OutputWriter {
    inner: Box<dyn Write + Send>,
}

impl OutputWriter {
    /// Create (truncating) `path`, or use stdout when `None`.
    pub fn open(output: Option<&PathBuf>) -> Result<Self> {
        let inner: Box<dyn Write + Send> = match output {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("Failed to write to {}", path.display()))?,
            ),
            None => Box::new(io::stdout()),
        };
        Ok(Self { inner })
    }

    /// Write and flush a chunk of output.
    pub fn write(&mut self, content: &str) -> Result<()> {
        self.inner.write_all(content.as_bytes())?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    OutputWriter::open(output)?.write(content)
}
