//! Error types for neerscan-store.

use std::path::PathBuf;

/// Result type for neerscan-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in neerscan-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The stored log could not be parsed, or an entry could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for neerscan_core::Error {
    fn from(err: Error) -> Self {
        neerscan_core::Error::persistence(err)
    }
}
