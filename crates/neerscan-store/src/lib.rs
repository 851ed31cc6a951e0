//! Local persistence for NeerScan water-quality readings.
//!
//! Readings are kept as an append-only log serialized under a single key of a
//! string key-value store. The default store is a SQLite database in the
//! platform data directory.
//!
//! # Example
//!
//! ```no_run
//! use neerscan_store::{ReadingLog, SqliteStore};
//!
//! let log = ReadingLog::new(SqliteStore::open_default()?);
//!
//! for entry in log.recent(10)? {
//!     println!("{:?} drinkable={}", entry.reading.ph, entry.is_drinkable);
//! }
//! # Ok::<(), neerscan_store::Error>(())
//! ```

mod error;
mod log;
mod schema;
mod store;

pub use error::{Error, Result};
pub use log::{LOG_KEY, LogEntry, ReadingLog};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/neerscan/data.db`
/// - macOS: `~/Library/Application Support/neerscan/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\neerscan\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("neerscan")
        .join("data.db")
}
