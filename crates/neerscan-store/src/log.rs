//! Append-only log of water-quality readings.
//!
//! The whole log is one JSON array stored under [`LOG_KEY`]. Each append reads
//! the array, pushes the new entry and writes it back. A stored value that does
//! not parse is never overwritten, so existing history cannot be truncated by a
//! failed append.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use neerscan_core::safety::classify;
use neerscan_core::traits::ReadingSink;
use neerscan_types::Reading;

use crate::error::Result;
use crate::store::KeyValueStore;

/// Key under which the serialized log is stored.
pub const LOG_KEY: &str = "waterData";

/// One persisted log entry: the reading plus the verdict when it was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The saved reading.
    #[serde(flatten)]
    pub reading: Reading,
    /// Whether the reading was classified safe to drink.
    #[serde(rename = "isDrinkable")]
    pub is_drinkable: bool,
}

impl LogEntry {
    /// Build an entry, classifying the reading.
    pub fn new(reading: Reading) -> Self {
        let is_drinkable = classify(&reading).is_safe;
        Self {
            reading,
            is_drinkable,
        }
    }
}

/// Ordered, append-only reading log on top of a [`KeyValueStore`].
///
/// # Example
///
/// ```
/// use neerscan_store::{MemoryStore, ReadingLog};
/// use neerscan_types::Reading;
///
/// let log = ReadingLog::new(MemoryStore::new());
/// log.append(&Reading::now().with_ph(7.0).with_tds(300.0).with_turbidity(2.0))?;
///
/// assert_eq!(log.len()?, 1);
/// assert!(log.entries()?[0].is_drinkable);
/// # Ok::<(), neerscan_store::Error>(())
/// ```
#[derive(Debug)]
pub struct ReadingLog<S> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> ReadingLog<S> {
    /// Wrap a key-value store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Append a reading at the end of the log.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Serialization`] if the stored log cannot be parsed; the
    /// stored value is left untouched in that case.
    pub fn append(&self, reading: &Reading) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut entries = self.entries()?;
        entries.push(LogEntry::new(reading.clone()));

        let encoded = serde_json::to_string(&entries)?;
        self.store.set(LOG_KEY, &encoded)?;
        debug!("Reading log now holds {} entries", entries.len());
        Ok(())
    }

    /// Every entry in insertion order.
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        match self.store.get(LOG_KEY)? {
            Some(raw) if !raw.trim().is_empty() => match serde_json::from_str(&raw) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    warn!("Stored reading log is unreadable: {}", e);
                    Err(e.into())
                }
            },
            _ => Ok(Vec::new()),
        }
    }

    /// Every reading in insertion order.
    pub fn all(&self) -> Result<Vec<Reading>> {
        Ok(self.entries()?.into_iter().map(|e| e.reading).collect())
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let mut entries = self.entries()?;
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        Ok(entries)
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    /// True when nothing has been appended.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<S: KeyValueStore + 'static> ReadingSink for ReadingLog<S> {
    fn append(&self, reading: &Reading) -> neerscan_core::Result<()> {
        ReadingLog::append(self, reading).map_err(Into::into)
    }
}
