//! Error types for payload decoding in neerscan-types.

use thiserror::Error;

/// Errors that can occur when decoding a NeerScan notification payload.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in neerscan-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The payload is not UTF-8 text holding a JSON object.
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Result type alias using neerscan-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
