//! Test doubles for the session capabilities.
//!
//! These let the session and front ends be exercised without BLE hardware,
//! a positioning source or a database.
//!
//! # Features
//!
//! - [`MockCentral`]: scripted discovery, service tables and notification injection
//! - **Failure injection**: refuse connects with a chosen [`ConnectError`]
//! - **Link loss**: end the notification stream as a dropped link would
//! - **Stalled discovery**: service discovery that never answers
//! - [`MemorySink`], [`StaticPermissions`], [`PendingLocation`]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream;
use futures::StreamExt;
use uuid::Uuid;

use neerscan_types::{DeviceDescriptor, Position, Reading, uuids};

use crate::error::{ConnectError, Error, LocationError, Result};
use crate::traits::{
    BleCentral, DeviceStream, LocationProvider, NotificationStream, Permission, PermissionGate,
    ReadingSink,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connection handle issued by [`MockCentral`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnection {
    /// Identifier passed to `connect`.
    pub id: String,
}

/// A scripted BLE central.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use neerscan_core::{DeviceSession, MockCentral};
///
/// #[tokio::main]
/// async fn main() {
///     let central = Arc::new(MockCentral::new().with_device("AA:01", "NeerScan-01"));
///     let session = DeviceSession::builder(Arc::clone(&central)).build().unwrap();
///
///     session.connect("AA:01").await.unwrap();
///     central.notify(br#"{"pH":7.2}"#);
///
///     session.close().await;
/// }
/// ```
pub struct MockCentral {
    devices: Mutex<Vec<DeviceDescriptor>>,
    services: Mutex<Vec<(Uuid, Uuid)>>,
    connect_error: Mutex<Option<ConnectError>>,
    notifier: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    finite_scan: AtomicBool,
    stalled_discovery: AtomicBool,
    connects: AtomicU32,
    disconnects: AtomicU32,
    stop_scans: AtomicU32,
    subscriptions: AtomicI32,
}

impl std::fmt::Debug for MockCentral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCentral")
            .field("devices", &lock(&self.devices).len())
            .field("connects", &self.connect_count())
            .field("disconnects", &self.disconnect_count())
            .finish_non_exhaustive()
    }
}

impl Default for MockCentral {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCentral {
    /// A central with no devices that exposes the NeerScan sensor characteristic.
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            services: Mutex::new(vec![(uuids::SENSOR_SERVICE, uuids::SENSOR_DATA)]),
            connect_error: Mutex::new(None),
            notifier: Mutex::new(None),
            finite_scan: AtomicBool::new(false),
            stalled_discovery: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            stop_scans: AtomicU32::new(0),
            subscriptions: AtomicI32::new(0),
        }
    }

    /// Add a device to the discovery script. Repeats are reported again.
    #[must_use]
    pub fn with_device(self, id: &str, name: &str) -> Self {
        lock(&self.devices).push(DeviceDescriptor::new(id, name));
        self
    }

    /// Replace the `(service, characteristic)` table returned by discovery.
    #[must_use]
    pub fn with_services(self, services: Vec<(Uuid, Uuid)>) -> Self {
        *lock(&self.services) = services;
        self
    }

    /// End the discovery stream after the scripted devices instead of
    /// keeping it open until the scan is stopped.
    #[must_use]
    pub fn finite_scan(self) -> Self {
        self.finite_scan.store(true, Ordering::SeqCst);
        self
    }

    /// Never complete service discovery, as an unresponsive peripheral would.
    #[must_use]
    pub fn with_stalled_discovery(self) -> Self {
        self.stalled_discovery.store(true, Ordering::SeqCst);
        self
    }

    /// Make subsequent connects fail with `error`, or succeed again with `None`.
    pub fn fail_connect(&self, error: Option<ConnectError>) {
        *lock(&self.connect_error) = error;
    }

    /// Push a raw payload to the current subscriber.
    ///
    /// Returns `false` if nothing is subscribed.
    pub fn notify(&self, payload: &[u8]) -> bool {
        lock(&self.notifier)
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(payload.to_vec()).is_ok())
    }

    /// End the notification stream, as a lost link would.
    pub fn drop_link(&self) {
        lock(&self.notifier).take();
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of disconnects.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Number of times discovery was stopped.
    pub fn stop_scan_count(&self) -> u32 {
        self.stop_scans.load(Ordering::SeqCst)
    }

    /// Subscribes minus unsubscribes.
    pub fn active_subscriptions(&self) -> i32 {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleCentral for MockCentral {
    type Connection = MockConnection;

    async fn start_scan(&self, _name_prefix: &str) -> Result<DeviceStream> {
        let devices = lock(&self.devices).clone();
        let scripted = stream::iter(devices);
        if self.finite_scan.load(Ordering::SeqCst) {
            Ok(Box::pin(scripted))
        } else {
            Ok(Box::pin(scripted.chain(stream::pending())))
        }
    }

    async fn stop_scan(&self) -> Result<()> {
        self.stop_scans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<MockConnection> {
        if let Some(err) = lock(&self.connect_error).clone() {
            return Err(Error::Connect(err));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { id: id.to_string() })
    }

    async fn discover_services(&self, _conn: &MockConnection) -> Result<Vec<(Uuid, Uuid)>> {
        if self.stalled_discovery.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(lock(&self.services).clone())
    }

    async fn subscribe(
        &self,
        _conn: &MockConnection,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded();
        *lock(&self.notifier) = Some(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(rx))
    }

    async fn unsubscribe(
        &self,
        _conn: &MockConnection,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<()> {
        self.subscriptions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _conn: &MockConnection) -> Result<()> {
        lock(&self.notifier).take();
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An in-memory [`ReadingSink`] that can be told to fail.
#[derive(Debug, Default)]
pub struct MemorySink {
    readings: Mutex<Vec<Reading>>,
    failing: AtomicBool,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make appends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Readings appended so far.
    pub fn readings(&self) -> Vec<Reading> {
        lock(&self.readings).clone()
    }
}

impl ReadingSink for MemorySink {
    fn append(&self, reading: &Reading) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::persistence("mock sink failure"));
        }
        lock(&self.readings).push(reading.clone());
        Ok(())
    }
}

/// A permission gate with a fixed set of refusals that records every request.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    denied: Arc<HashSet<Permission>>,
    requests: Arc<Mutex<Vec<Vec<Permission>>>>,
}

impl StaticPermissions {
    /// Grant everything.
    pub fn granting_all() -> Self {
        Self::default()
    }

    /// Refuse the listed permissions.
    pub fn denying(denied: &[Permission]) -> Self {
        Self {
            denied: Arc::new(denied.iter().copied().collect()),
            requests: Arc::default(),
        }
    }

    /// Every request made so far, in order.
    pub fn requests(&self) -> Vec<Vec<Permission>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl PermissionGate for StaticPermissions {
    async fn request(&self, permissions: &[Permission]) -> bool {
        lock(&self.requests).push(permissions.to_vec());
        !permissions.iter().any(|p| self.denied.contains(p))
    }
}

/// A location provider that never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingLocation;

#[async_trait]
impl LocationProvider for PendingLocation {
    async fn current_position(&self) -> std::result::Result<Position, LocationError> {
        futures::future::pending().await
    }
}
