//! Location stamping for readings.
//!
//! Location is best effort. A refused permission, a provider error or a slow
//! fix all degrade to a placeholder string and never hold up classification.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use neerscan_types::Position;

use crate::error::LocationError;
use crate::traits::{LocationProvider, Permission, PermissionGate};

/// Stamp used when the location permission is refused.
pub const PERMISSION_DENIED: &str = "Location permission denied";

/// Stamp used when no fix could be obtained.
pub const NOT_AVAILABLE: &str = "Location not available";

/// Text shown while the fix is still pending.
pub const FETCHING: &str = "Fetching location...";

/// Default time allowed for a position fix.
pub const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Request a position, bounded by `timeout`.
///
/// # Errors
///
/// [`LocationError::PermissionDenied`] when the gate refuses
/// [`Permission::Location`], [`LocationError::Timeout`] when the provider is
/// slower than `timeout`, or whatever the provider itself reports.
pub async fn current_position(
    permissions: &dyn PermissionGate,
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> Result<Position, LocationError> {
    if !permissions.request(&[Permission::Location]).await {
        return Err(LocationError::PermissionDenied);
    }

    match tokio::time::timeout(timeout, provider.current_position()).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout),
    }
}

/// Resolve the location stamp for a reading.
///
/// Returns `"Lat: <lat>, Lon: <lon>"` on success, otherwise one of
/// [`PERMISSION_DENIED`] or [`NOT_AVAILABLE`].
pub async fn resolve_stamp(
    permissions: &dyn PermissionGate,
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> String {
    match current_position(permissions, provider, timeout).await {
        Ok(position) => {
            debug!(%position, "Location resolved");
            position.to_string()
        }
        Err(LocationError::PermissionDenied) => {
            warn!("Location permission denied");
            PERMISSION_DENIED.to_string()
        }
        Err(e) => {
            warn!(error = %e, "Location not available");
            NOT_AVAILABLE.to_string()
        }
    }
}

/// A provider that always reports the same coordinates.
///
/// Used for stationary installations where the position is configured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedLocation(pub Position);

impl FixedLocation {
    /// Create a provider for the given coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self(Position::new(latitude, longitude))
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self) -> Result<Position, LocationError> {
        Ok(self.0)
    }
}

/// A provider for hosts without any positioning source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn current_position(&self) -> Result<Position, LocationError> {
        Err(LocationError::Unavailable(
            "no positioning source configured".to_string(),
        ))
    }
}
