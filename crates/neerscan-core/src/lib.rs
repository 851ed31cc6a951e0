//! Core library for NeerScan water-quality sensors.
//!
//! This crate connects to a NeerScan probe over Bluetooth Low Energy, decodes
//! the pH, TDS and turbidity values it pushes, and classifies the water as safe
//! or unsafe to drink with a purifier recommendation.
//!
//! # Features
//!
//! - **Discovery**: scan for peripherals advertising the `NeerScan` name prefix
//! - **Sessions**: an explicit connect/subscribe state machine with teardown on every exit path
//! - **Classification**: fixed drinking-water thresholds with per-measurement suggestions
//! - **Observability**: snapshots via `watch`, events via `broadcast`
//! - **Pluggable capabilities**: BLE, location, permissions and persistence are traits
//!
//! # Platform Differences
//!
//! Device identifiers are Bluetooth MAC addresses on Linux and Windows and
//! CoreBluetooth UUIDs on macOS. Store the identifier returned by a scan and
//! pass it back to [`DeviceSession::connect`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use neerscan_core::{BtleCentral, DeviceSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central = Arc::new(BtleCentral::new().await?);
//!     let session = DeviceSession::new(central, SessionConfig::default())?;
//!
//!     for device in session.scan().await? {
//!         println!("{device}");
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod error;
pub mod events;
pub mod location;
pub mod mock;
pub mod safety;
pub mod session;
pub mod traits;

// Re-export the shared data model
pub use neerscan_types::types;
pub use neerscan_types::uuid;
pub use neerscan_types::uuid as uuids;
pub use neerscan_types::{DecodeError, DeviceDescriptor, Measurement, PartialReading, Position, Reading};

// Core exports
pub use ble::{BtleCentral, BtleConnection};
pub use error::{ConnectError, Error, LocationError, Result};
pub use events::{EventDispatcher, EventReceiver, SessionEvent};
pub use location::{FixedLocation, NoLocation};
pub use mock::{MemorySink, MockCentral, PendingLocation, StaticPermissions};
pub use safety::{Purifier, SafetyVerdict, classify};
pub use session::{DeviceSession, SessionBuilder, SessionConfig, SessionSlot, SessionSnapshot, SessionState};
pub use traits::{
    BleCentral, GrantedPermissions, LocationProvider, Permission, PermissionGate, ReadingSink,
};
