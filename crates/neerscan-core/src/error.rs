//! Error types for neerscan-core.
//!
//! Failures fall into a few groups, each handled differently by the session:
//!
//! | Error | Effect on the session |
//! |-------|-----------------------|
//! | [`ConnectError`] | Terminal for the connect attempt; state becomes `Error` |
//! | [`DecodeError`] | Logged and skipped; the subscription stays alive |
//! | [`LocationError`] | Degrades to a placeholder location stamp |
//! | [`Error::Persistence`] | Logged; the in-memory reading is kept |
//!
//! None of them trigger an automatic retry. A caller that wants another attempt
//! calls `connect` again.

use std::time::Duration;

use thiserror::Error;

use neerscan_types::DecodeError;

/// Errors that can occur while scanning for or talking to a NeerScan device.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The connect attempt failed.
    #[error("Connection failed: {0}")]
    Connect(#[from] ConnectError),

    /// A notification payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The location capability failed.
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    /// The reading log could not be written.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable Bluetooth adapter is present.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// The scan permission precondition was refused.
    #[error("Bluetooth scan permission denied")]
    ScanPermissionDenied,

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The operation is not allowed in the session's current state.
    #[error("Operation '{operation}' not allowed while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// Human-readable name of the current state.
        state: String,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a connect attempt failed.
///
/// Carried in the session snapshot while the session sits in the `Error` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The Bluetooth connect permission was refused.
    #[error("Bluetooth permission denied")]
    NoPermission,

    /// The link could not be established or was lost.
    #[error("link failure: {0}")]
    LinkFailure(String),

    /// The device does not expose the sensor service/characteristic pair.
    #[error("service {service} with characteristic {characteristic} not found")]
    ServiceNotFound {
        /// Expected service UUID.
        service: String,
        /// Expected characteristic UUID.
        characteristic: String,
    },
}

impl ConnectError {
    /// Create a link failure from anything displayable.
    pub fn link(reason: impl std::fmt::Display) -> Self {
        Self::LinkFailure(reason.to_string())
    }
}

impl From<btleplug::Error> for ConnectError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => ConnectError::NoPermission,
            other => ConnectError::LinkFailure(other.to_string()),
        }
    }
}

/// Failures of the location capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LocationError {
    /// The location permission was refused.
    #[error("location permission denied")]
    PermissionDenied,

    /// No fix could be obtained.
    #[error("location unavailable: {0}")]
    Unavailable(String),

    /// No fix arrived within the configured timeout.
    #[error("location request timed out")]
    Timeout,
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a persistence error from anything displayable.
    pub fn persistence(reason: impl std::fmt::Display) -> Self {
        Self::Persistence(reason.to_string())
    }

    /// Convert into the [`ConnectError`] reported by a failed connect attempt.
    ///
    /// Errors that already describe a connect failure keep their meaning; a
    /// Bluetooth permission refusal becomes [`ConnectError::NoPermission`]; anything
    /// else is reported as a link failure.
    pub fn into_connect_error(self) -> ConnectError {
        match self {
            Error::Connect(err) => err,
            Error::Bluetooth(err) => err.into(),
            other => ConnectError::LinkFailure(other.to_string()),
        }
    }
}

/// Result type alias using neerscan-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
