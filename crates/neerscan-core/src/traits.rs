//! Capability traits the device session is built on.
//!
//! The session never talks to btleplug, a location service or a database
//! directly. It is generic over these traits so that production adapters
//! ([`crate::ble::BtleCentral`], [`crate::location::FixedLocation`]) and the
//! test doubles in [`crate::mock`] are interchangeable.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use neerscan_types::{DeviceDescriptor, Position, Reading};

use crate::error::{LocationError, Result};

/// Stream of peripherals reported while a scan is running.
pub type DeviceStream = Pin<Box<dyn Stream<Item = DeviceDescriptor> + Send>>;

/// Stream of raw characteristic notification payloads.
///
/// The stream ending means the link is gone.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// A BLE central role able to scan for and talk to NeerScan peripherals.
///
/// # Example
///
/// ```ignore
/// use neerscan_core::{BleCentral, Result};
///
/// async fn first_service<B: BleCentral>(central: &B, id: &str) -> Result<()> {
///     let conn = central.connect(id).await?;
///     let services = central.discover_services(&conn).await?;
///     println!("{} characteristics", services.len());
///     central.disconnect(&conn).await
/// }
/// ```
#[async_trait]
pub trait BleCentral: Send + Sync + 'static {
    /// An open connection to one peripheral.
    type Connection: Send + Sync + 'static;

    /// Start discovery, yielding peripherals whose advertised name starts with
    /// `name_prefix`. The same peripheral may be reported more than once.
    async fn start_scan(&self, name_prefix: &str) -> Result<DeviceStream>;

    /// Stop a running scan. Stopping when no scan runs is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a connection to the peripheral with the given identifier.
    async fn connect(&self, id: &str) -> Result<Self::Connection>;

    /// Discover services and list every `(service, characteristic)` pair.
    async fn discover_services(&self, conn: &Self::Connection) -> Result<Vec<(Uuid, Uuid)>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(
        &self,
        conn: &Self::Connection,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(
        &self,
        conn: &Self::Connection,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<()>;

    /// Close the connection.
    async fn disconnect(&self, conn: &Self::Connection) -> Result<()>;
}

/// Source of the device's geographic position.
#[async_trait]
pub trait LocationProvider: Send + Sync + 'static {
    /// Obtain the current position.
    async fn current_position(&self) -> std::result::Result<Position, LocationError>;
}

/// Runtime permissions gated before scanning, connecting and location fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Discover nearby peripherals.
    BluetoothScan,
    /// Connect to a peripheral.
    BluetoothConnect,
    /// Read the device position.
    Location,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::BluetoothScan => write!(f, "bluetooth-scan"),
            Permission::BluetoothConnect => write!(f, "bluetooth-connect"),
            Permission::Location => write!(f, "location"),
        }
    }
}

/// Precondition check for platform permissions.
#[async_trait]
pub trait PermissionGate: Send + Sync + 'static {
    /// Request every permission in `permissions`. Returns `true` only if all
    /// of them are granted.
    async fn request(&self, permissions: &[Permission]) -> bool;
}

/// Desktop permission gate: access is governed by the OS, so every request
/// is granted here and refusals surface as Bluetooth errors instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedPermissions;

#[async_trait]
impl PermissionGate for GrantedPermissions {
    async fn request(&self, _permissions: &[Permission]) -> bool {
        true
    }
}

/// Destination for complete readings.
///
/// Implemented by the reading log in neerscan-store. The session calls
/// [`ReadingSink::append`] on the blocking thread pool, so it may block on I/O.
pub trait ReadingSink: Send + Sync + 'static {
    /// Persist one reading.
    fn append(&self, reading: &Reading) -> Result<()>;
}
