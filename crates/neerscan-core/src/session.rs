//! Device session state machine.
//!
//! A [`DeviceSession`] drives one NeerScan device through
//!
//! ```text
//! Idle -> Scanning -> Idle
//! Idle -> Connecting -> Subscribed -> (Error | Closed)
//!                   \-> Error
//! ```
//!
//! While subscribed, every notification is decoded, merged into the current
//! [`Reading`], classified and, once a fresh set of all three measurements has
//! arrived, appended to the configured [`ReadingSink`]. Notifications are handled
//! one at a time by a single task.
//!
//! The current state is observable through [`DeviceSession::snapshot`] (polling),
//! [`DeviceSession::watch`] (a `watch` receiver) and [`DeviceSession::events`]
//! (a broadcast of [`SessionEvent`]s).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use neerscan_core::{BtleCentral, DeviceSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central = Arc::new(BtleCentral::new().await?);
//!     let session = DeviceSession::builder(central).build()?;
//!
//!     let devices = session.scan().await?;
//!     if let Some(device) = devices.first() {
//!         session.connect(&device.id).await?;
//!         let mut updates = session.watch();
//!         updates.changed().await?;
//!         println!("{:?}", updates.borrow().reading);
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use neerscan_types::{DeviceDescriptor, Measurement, Reading, codec, uuids};

use crate::error::{ConnectError, Error, Result};
use crate::events::{EventDispatcher, EventReceiver, SessionEvent};
use crate::location::{self, DEFAULT_LOCATION_TIMEOUT, NoLocation};
use crate::safety::{SafetyVerdict, classify};
use crate::traits::{
    BleCentral, GrantedPermissions, LocationProvider, NotificationStream, Permission,
    PermissionGate, ReadingSink,
};

/// Default discovery window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Default delay before the first reading is considered ready for display.
pub const DEFAULT_FIRST_READING_GRACE: Duration = Duration::from_secs(5);

/// Default bound on opening a connection and subscribing.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for a device session.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use neerscan_core::SessionConfig;
///
/// let config = SessionConfig::default()
///     .scan_window(Duration::from_secs(20))
///     .name_prefix("NeerScan-Lab");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Advertised name prefix used to filter discovery.
    pub name_prefix: String,
    /// How long a scan runs unless stopped earlier.
    pub scan_window: Duration,
    /// Delay after subscribing before the reading is reported as ready.
    pub first_reading_grace: Duration,
    /// Time allowed for a location fix.
    pub location_timeout: Duration,
    /// Bound on connect, discovery and subscribe together.
    pub connect_timeout: Duration,
    /// Sensor service UUID.
    pub service: Uuid,
    /// Sensor data characteristic UUID.
    pub characteristic: Uuid,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name_prefix: uuids::DEVICE_NAME_PREFIX.to_string(),
            scan_window: DEFAULT_SCAN_WINDOW,
            first_reading_grace: DEFAULT_FIRST_READING_GRACE,
            location_timeout: DEFAULT_LOCATION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            service: uuids::SENSOR_SERVICE,
            characteristic: uuids::SENSOR_DATA,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised name prefix.
    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the scan window.
    #[must_use]
    pub fn scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the first-reading grace period.
    #[must_use]
    pub fn first_reading_grace(mut self, grace: Duration) -> Self {
        self.first_reading_grace = grace;
        self
    }

    /// Set the location timeout.
    #[must_use]
    pub fn location_timeout(mut self, timeout: Duration) -> Self {
        self.location_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service and characteristic to subscribe to.
    #[must_use]
    pub fn characteristic(mut self, service: Uuid, characteristic: Uuid) -> Self {
        self.service = service;
        self.characteristic = characteristic;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.name_prefix.trim().is_empty() {
            return Err(Error::invalid_config("name prefix must not be empty"));
        }
        let durations = [
            ("scan window", self.scan_window),
            ("location timeout", self.location_timeout),
            ("connect timeout", self.connect_timeout),
            ("first reading grace", self.first_reading_grace),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No active resources.
    Idle,
    /// Discovery is running.
    Scanning,
    /// Opening the connection and discovering services.
    Connecting,
    /// Receiving notifications.
    Subscribed,
    /// The last connect attempt failed or the link was lost.
    Error,
    /// Torn down by the caller.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Connecting => "connecting",
            SessionState::Subscribed => "subscribed",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Device targeted by the last connect.
    pub device_id: Option<String>,
    /// Current state.
    pub state: SessionState,
    /// Accumulated reading since the last connect.
    pub reading: Reading,
    /// Classification of `reading`.
    pub verdict: SafetyVerdict,
    /// Cause of the `Error` state.
    pub error: Option<ConnectError>,
    /// Whether the first-reading grace period has passed.
    pub grace_elapsed: bool,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            device_id: None,
            state: SessionState::Idle,
            reading: Reading::now(),
            verdict: SafetyVerdict::default(),
            error: None,
            grace_elapsed: false,
        }
    }

    /// True once the grace period has passed and some data has arrived.
    pub fn is_ready(&self) -> bool {
        self.grace_elapsed && self.reading.has_data()
    }

    /// Location stamp to display, `"Fetching location..."` while unresolved.
    pub fn location_display(&self) -> &str {
        self.reading
            .location
            .as_deref()
            .unwrap_or(location::FETCHING)
    }
}

/// Resources held while subscribed.
struct ActiveLink<C> {
    conn: Arc<C>,
    generation: u64,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// State shared between the session handle and its background tasks.
struct Shared<B: BleCentral> {
    central: Arc<B>,
    config: SessionConfig,
    permissions: Arc<dyn PermissionGate>,
    location: Arc<dyn LocationProvider>,
    sink: Option<Arc<dyn ReadingSink>>,
    events: EventDispatcher,
    snapshot: watch::Sender<SessionSnapshot>,
    active: Mutex<Option<ActiveLink<B::Connection>>>,
    scan_stop: std::sync::Mutex<Option<CancellationToken>>,
    connect_abort: std::sync::Mutex<Option<CancellationToken>>,
    generation: AtomicU64,
}

/// Builder for [`DeviceSession`].
pub struct SessionBuilder<B: BleCentral> {
    central: Arc<B>,
    config: SessionConfig,
    permissions: Arc<dyn PermissionGate>,
    location: Arc<dyn LocationProvider>,
    sink: Option<Arc<dyn ReadingSink>>,
    event_capacity: usize,
}

impl<B: BleCentral> SessionBuilder<B> {
    /// Set the session configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the permission gate. Defaults to [`GrantedPermissions`].
    #[must_use]
    pub fn permissions(mut self, permissions: impl PermissionGate) -> Self {
        self.permissions = Arc::new(permissions);
        self
    }

    /// Set the location provider. Defaults to [`NoLocation`].
    #[must_use]
    pub fn location(mut self, provider: impl LocationProvider) -> Self {
        self.location = Arc::new(provider);
        self
    }

    /// Persist complete readings to `sink`.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn ReadingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the event buffer size per receiver.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration and create the session.
    pub fn build(self) -> Result<DeviceSession<B>> {
        self.config.validate()?;
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event capacity must be non-zero"));
        }
        let (snapshot, _) = watch::channel(SessionSnapshot::initial());
        Ok(DeviceSession {
            shared: Arc::new(Shared {
                central: self.central,
                config: self.config,
                permissions: self.permissions,
                location: self.location,
                sink: self.sink,
                events: EventDispatcher::new(self.event_capacity),
                snapshot,
                active: Mutex::new(None),
                scan_stop: std::sync::Mutex::new(None),
                connect_abort: std::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        })
    }
}

/// A session with one NeerScan device.
///
/// Cloning is not supported; share a session between tasks with `Arc`.
///
/// # Cleanup
///
/// Call [`DeviceSession::close`] when done. Dropping an open session performs a
/// best-effort disconnect on the current tokio runtime and logs a warning.
pub struct DeviceSession<B: BleCentral> {
    shared: Arc<Shared<B>>,
}

impl<B: BleCentral> std::fmt::Debug for DeviceSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.shared.snapshot.borrow();
        f.debug_struct("DeviceSession")
            .field("device_id", &snapshot.device_id)
            .field("state", &snapshot.state)
            .finish_non_exhaustive()
    }
}

impl<B: BleCentral> DeviceSession<B> {
    /// Start building a session on `central`.
    pub fn builder(central: Arc<B>) -> SessionBuilder<B> {
        SessionBuilder {
            central,
            config: SessionConfig::default(),
            permissions: Arc::new(GrantedPermissions),
            location: Arc::new(NoLocation),
            sink: None,
            event_capacity: 100,
        }
    }

    /// Create a session with default capabilities.
    pub fn new(central: Arc<B>, config: SessionConfig) -> Result<Self> {
        Self::builder(central).config(config).build()
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Subscribe to session events.
    pub fn events(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    /// Discover NeerScan devices for the configured scan window.
    ///
    /// Returns distinct devices in first-seen order. The scan ends early when
    /// [`DeviceSession::stop_scan`] or [`DeviceSession::close`] is called, or when
    /// the discovery stream ends. The session returns to `Idle` afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] while connected, [`Error::ScanPermissionDenied`] if
    /// the scan permissions are refused, or the adapter's error if discovery
    /// cannot start.
    #[tracing::instrument(skip_all, fields(prefix = %self.shared.config.name_prefix))]
    pub async fn scan(&self) -> Result<Vec<DeviceDescriptor>> {
        let shared = &self.shared;
        let active = shared.active.lock().await;
        if active.is_some() {
            return Err(Error::InvalidState {
                operation: "scan",
                state: self.state().to_string(),
            });
        }

        // Installed before the permission prompt so close() can end it.
        let stop = CancellationToken::new();
        *lock_token(&shared.scan_stop) = Some(stop.clone());
        let result = shared.run_scan(&stop).await;
        lock_token(&shared.scan_stop).take();
        drop(active);

        let devices = result?;
        info!("Scan finished with {} device(s)", devices.len());
        Ok(devices)
    }

    /// End a running scan early. No effect when no scan runs.
    pub fn stop_scan(&self) {
        if let Some(stop) = lock_token(&self.shared.scan_stop).as_ref() {
            debug!("Stopping scan");
            stop.cancel();
        }
    }

    /// Connect to `id` and subscribe to the sensor characteristic.
    ///
    /// Any previous connection is released first. Opening, discovery and
    /// subscribing share one `connect_timeout` deadline. On failure, timeout or
    /// a concurrent [`DeviceSession::close`] the partial connection is
    /// released, the session moves to `Error` and the cause is returned as
    /// [`Error::Connect`]. No retry is attempted.
    #[tracing::instrument(skip_all, fields(device = %id))]
    pub async fn connect(&self, id: &str) -> Result<()> {
        let shared = &self.shared;
        let mut active = shared.active.lock().await;
        let abort = CancellationToken::new();
        *lock_token(&shared.connect_abort) = Some(abort.clone());

        if let Some(previous) = active.take() {
            info!("Releasing previous connection");
            shared.release(previous).await;
        }

        shared.snapshot.send_modify(|s| {
            s.device_id = Some(id.to_string());
            s.reading = Reading::now();
            s.verdict = SafetyVerdict::default();
            s.grace_elapsed = false;
        });
        shared.transition(SessionState::Connecting, None);

        let established = shared.establish(id, &abort).await;
        lock_token(&shared.connect_abort).take();

        match established {
            Ok((conn, stream)) => {
                let link = Shared::start(shared, conn, stream);
                *active = Some(link);
                shared.transition(SessionState::Subscribed, None);
                Ok(())
            }
            Err(err) => {
                let cause = err.into_connect_error();
                warn!(error = %cause, "Connect failed");
                shared.transition(SessionState::Error, Some(cause.clone()));
                Err(Error::Connect(cause))
            }
        }
    }

    /// Tear the session down.
    ///
    /// Stops a running scan, abandons a pending connect, unsubscribes and
    /// disconnects. Idempotent: calling it again leaves the session `Closed`
    /// without error.
    pub async fn close(&self) {
        self.stop_scan();
        if let Some(abort) = lock_token(&self.shared.connect_abort).as_ref() {
            debug!("Abandoning pending connect");
            abort.cancel();
        }
        let shared = &self.shared;
        let mut active = shared.active.lock().await;
        if let Some(link) = active.take() {
            shared.release(link).await;
        }
        shared.transition(SessionState::Closed, None);
    }
}

impl<B: BleCentral> Shared<B> {
    /// Move to `state`, publishing an event when anything changed.
    fn transition(&self, state: SessionState, error: Option<ConnectError>) {
        let message = error.as_ref().map(ToString::to_string);
        let changed = self.snapshot.send_if_modified(|s| {
            if s.state == state && s.error == error {
                return false;
            }
            s.state = state;
            s.error = error;
            true
        });
        if changed {
            info!(%state, "Session state changed");
            self.events.send(SessionEvent::StateChanged {
                state,
                error: message,
            });
        }
    }

    /// Request permissions, then discover until the window ends or `stop` fires.
    async fn run_scan(&self, stop: &CancellationToken) -> Result<Vec<DeviceDescriptor>> {
        let request = self.permissions.request(&[
            Permission::BluetoothScan,
            Permission::BluetoothConnect,
            Permission::Location,
        ]);
        let granted = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!("Scan stopped before it started");
                return Ok(Vec::new());
            }
            granted = request => granted,
        };
        if !granted {
            warn!("Scan permissions refused");
            return Err(Error::ScanPermissionDenied);
        }

        self.transition(SessionState::Scanning, None);
        let result = self.collect_devices(stop).await;
        if let Err(e) = self.central.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }
        self.transition(SessionState::Idle, None);
        result
    }

    async fn collect_devices(&self, stop: &CancellationToken) -> Result<Vec<DeviceDescriptor>> {
        let mut stream = self.central.start_scan(&self.config.name_prefix).await?;
        let window = tokio::time::sleep(self.config.scan_window);
        tokio::pin!(window);

        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!("Scan stopped");
                    break;
                }
                _ = &mut window => {
                    debug!("Scan window elapsed");
                    break;
                }
                next = stream.next() => match next {
                    Some(device) => {
                        if device.name.starts_with(&self.config.name_prefix)
                            && seen.insert(device.id.clone())
                        {
                            info!("Found {}", device);
                            self.events.send(SessionEvent::Discovered {
                                device: device.clone(),
                            });
                            devices.push(device);
                        }
                    }
                    None => break,
                },
            }
        }
        Ok(devices)
    }

    /// Open, discover and subscribe before the connect deadline.
    ///
    /// Once the link is open it is disconnected on every failure, including
    /// the deadline passing and `abort` firing.
    async fn establish(
        &self,
        id: &str,
        abort: &CancellationToken,
    ) -> Result<(B::Connection, NotificationStream)> {
        let deadline = Instant::now() + self.config.connect_timeout;

        let open = async {
            if !self.permissions.request(&[Permission::BluetoothConnect]).await {
                return Err(Error::Connect(ConnectError::NoPermission));
            }
            self.central.connect(id).await
        };
        let conn = self.bounded(open, deadline, abort).await?;

        match self.bounded(self.subscribe(&conn), deadline, abort).await {
            Ok(stream) => Ok((conn, stream)),
            Err(err) => {
                if let Err(e) = self.central.disconnect(&conn).await {
                    debug!(error = %e, "Disconnect after failed setup also failed");
                }
                Err(err)
            }
        }
    }

    /// Run one connect step until `deadline`, or until `abort` fires.
    async fn bounded<T>(
        &self,
        step: impl Future<Output = Result<T>>,
        deadline: Instant,
        abort: &CancellationToken,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(Error::Connect(ConnectError::link("connect cancelled"))),
            result = tokio::time::timeout_at(deadline, step) => result.unwrap_or_else(|_| {
                Err(Error::timeout("connect", self.config.connect_timeout))
            }),
        }
    }

    async fn subscribe(&self, conn: &B::Connection) -> Result<NotificationStream> {
        let (service, characteristic) = (self.config.service, self.config.characteristic);
        let pairs = self.central.discover_services(conn).await?;
        if !pairs.contains(&(service, characteristic)) {
            return Err(ConnectError::ServiceNotFound {
                service: service.to_string(),
                characteristic: characteristic.to_string(),
            }
            .into());
        }
        self.central.subscribe(conn, service, characteristic).await
    }

    /// Spawn the notification pump, grace timer and location lookup.
    fn start(
        this: &Arc<Self>,
        conn: B::Connection,
        stream: NotificationStream,
    ) -> ActiveLink<B::Connection> {
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(pump(Arc::clone(this), stream, cancel.clone(), generation));

        let grace = {
            let shared = Arc::clone(this);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(shared.config.first_reading_grace) => {
                        debug!("First-reading grace period elapsed");
                        shared.snapshot.send_modify(|s| s.grace_elapsed = true);
                        shared.events.send(SessionEvent::GraceElapsed);
                    }
                }
            })
        };

        let location = {
            let shared = Arc::clone(this);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let lookup = location::resolve_stamp(
                    shared.permissions.as_ref(),
                    shared.location.as_ref(),
                    shared.config.location_timeout,
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    stamp = lookup => {
                        shared.snapshot.send_modify(|s| s.reading.location = Some(stamp.clone()));
                        shared.events.send(SessionEvent::LocationResolved { location: stamp });
                    }
                }
            })
        };

        ActiveLink {
            conn: Arc::new(conn),
            generation,
            cancel,
            tasks: vec![pump, grace, location],
        }
    }

    /// Stop background tasks, unsubscribe and disconnect. Errors are logged.
    async fn release(&self, link: ActiveLink<B::Connection>) {
        link.cancel.cancel();
        for task in link.tasks {
            task.abort();
            let _ = task.await;
        }

        let (service, characteristic) = (self.config.service, self.config.characteristic);
        if let Err(e) = self
            .central
            .unsubscribe(&link.conn, service, characteristic)
            .await
        {
            debug!(error = %e, "Unsubscribe failed (link may already be down)");
        }
        if let Err(e) = self.central.disconnect(&link.conn).await {
            debug!(error = %e, "Disconnect failed (link may already be down)");
        }
        debug!("Connection released");
    }

    /// Handle the end of the notification stream for link `generation`.
    async fn on_link_lost(self: Arc<Self>, generation: u64) {
        let mut active = self.active.lock().await;
        if !active.as_ref().is_some_and(|l| l.generation == generation) {
            return;
        }
        if let Some(link) = active.take() {
            self.release(link).await;
            self.transition(
                SessionState::Error,
                Some(ConnectError::link("notification stream ended")),
            );
        }
    }

    /// Decode, merge, classify and maybe persist one notification.
    async fn handle_notification(&self, raw: &[u8], fresh: &mut HashSet<Measurement>) {
        let partial = match codec::decode(raw) {
            Ok(partial) => partial,
            Err(e) => {
                warn!(error = %e, "Skipping malformed notification");
                self.events.send(SessionEvent::DecodeFailed {
                    error: e.to_string(),
                });
                return;
            }
        };
        if partial.is_empty() {
            debug!("Notification carried no measurements");
            return;
        }

        let now = OffsetDateTime::now_utc();
        let mut updated = None;
        self.snapshot.send_modify(|s| {
            s.reading.merge(&partial, now);
            s.verdict = classify(&s.reading);
            updated = Some((s.reading.clone(), s.verdict.clone()));
        });
        let Some((reading, verdict)) = updated else {
            return;
        };
        debug!(ph = ?reading.ph, tds = ?reading.tds, turbidity = ?reading.turbidity, "Reading updated");

        fresh.extend(Measurement::ALL.into_iter().filter(|m| partial.contains(*m)));
        let newly_complete = fresh.len() == Measurement::ALL.len();

        self.events.send(SessionEvent::Reading {
            reading: reading.clone(),
            verdict,
        });

        if newly_complete {
            fresh.clear();
            self.persist(reading).await;
        }
    }

    /// Append on the blocking pool; the pump waits so appends stay ordered.
    async fn persist(&self, reading: Reading) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let record = reading.clone();
        let appended = tokio::task::spawn_blocking(move || sink.append(&record))
            .await
            .unwrap_or_else(|e| Err(Error::persistence(e)));
        match appended {
            Ok(()) => {
                info!("Reading saved");
                self.events.send(SessionEvent::Persisted { reading });
            }
            Err(e) => {
                warn!(error = %e, "Failed to save reading");
                self.events.send(SessionEvent::PersistenceFailed {
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Process notifications sequentially until cancelled or the link drops.
async fn pump<B: BleCentral>(
    shared: Arc<Shared<B>>,
    mut stream: NotificationStream,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut fresh = HashSet::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(raw) => shared.handle_notification(&raw, &mut fresh).await,
                None => {
                    if !cancel.is_cancelled() {
                        warn!("Notification stream ended, link lost");
                        tokio::spawn(Arc::clone(&shared).on_link_lost(generation));
                    }
                    break;
                }
            },
        }
    }
}

fn lock_token(
    slot: &std::sync::Mutex<Option<CancellationToken>>,
) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<B: BleCentral> Drop for DeviceSession<B> {
    fn drop(&mut self) {
        if let Some(stop) = lock_token(&self.shared.scan_stop).take() {
            stop.cancel();
        }
        if let Some(abort) = lock_token(&self.shared.connect_abort).take() {
            abort.cancel();
        }

        let Ok(mut active) = self.shared.active.try_lock() else {
            return;
        };
        let Some(link) = active.take() else {
            return;
        };

        warn!(
            device_id = ?self.shared.snapshot.borrow().device_id,
            "DeviceSession dropped without calling close() - performing best-effort cleanup. \
             For reliable cleanup, call session.close().await before dropping."
        );

        link.cancel.cancel();
        for task in &link.tasks {
            task.abort();
        }

        let central = Arc::clone(&self.shared.central);
        let (service, characteristic) =
            (self.shared.config.service, self.shared.config.characteristic);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = central.unsubscribe(&link.conn, service, characteristic).await;
                match central.disconnect(&link.conn).await {
                    Ok(()) => debug!("Best-effort disconnect completed"),
                    Err(e) => debug!(error = %e, "Best-effort disconnect failed"),
                }
            });
        }
    }
}

/// Holder enforcing at most one active session per process.
///
/// Installing a new session closes the previous one first.
pub struct SessionSlot<B: BleCentral> {
    current: Mutex<Option<Arc<DeviceSession<B>>>>,
}

impl<B: BleCentral> Default for SessionSlot<B> {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }
}

impl<B: BleCentral> SessionSlot<B> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current session, if any, and install `session`.
    pub async fn replace(&self, session: DeviceSession<B>) -> Arc<DeviceSession<B>> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.close().await;
        }
        let session = Arc::new(session);
        *current = Some(Arc::clone(&session));
        session
    }

    /// The installed session.
    pub async fn current(&self) -> Option<Arc<DeviceSession<B>>> {
        self.current.lock().await.clone()
    }

    /// Close and remove the installed session.
    pub async fn clear(&self) {
        if let Some(previous) = self.current.lock().await.take() {
            previous.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{FixedLocation, NOT_AVAILABLE, PERMISSION_DENIED};
    use crate::mock::{MemorySink, MockCentral, PendingLocation, StaticPermissions};

    const DEVICE: &str = "AA:BB:CC:DD:EE:01";

    fn central() -> Arc<MockCentral> {
        Arc::new(
            MockCentral::new()
                .with_device(DEVICE, "NeerScan-01")
                .with_device("AA:BB:CC:DD:EE:02", "NeerScan-02"),
        )
    }

    async fn wait_until(
        session: &DeviceSession<MockCentral>,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = session.watch();
        let snapshot = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
            .await
            .expect("condition not reached")
            .expect("session dropped");
        snapshot.clone()
    }

    async fn next_event(
        events: &mut EventReceiver,
        mut predicate: impl FnMut(&SessionEvent) -> bool,
    ) -> SessionEvent {
        let wait = async {
            loop {
                let event = events.recv().await.expect("event stream closed");
                if predicate(&event) {
                    return event;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .expect("event not received")
    }

    fn is_persisted(event: &SessionEvent) -> bool {
        matches!(event, SessionEvent::Persisted { .. })
    }

    async fn connected(
        central: &Arc<MockCentral>,
        sink: Arc<MemorySink>,
    ) -> DeviceSession<MockCentral> {
        let session = DeviceSession::builder(Arc::clone(central))
            .sink(sink)
            .build()
            .unwrap();
        session.connect(DEVICE).await.unwrap();
        session
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(SessionConfig::default().name_prefix("  ").validate().is_err());
        assert!(
            SessionConfig::default()
                .scan_window(Duration::ZERO)
                .validate()
                .is_err()
        );
        let err = SessionConfig::default()
            .location_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("location timeout"));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = DeviceSession::builder(central())
            .config(SessionConfig::default().connect_timeout(Duration::ZERO))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.name_prefix, "NeerScan");
        assert_eq!(config.scan_window, Duration::from_secs(10));
        assert_eq!(config.first_reading_grace, Duration::from_secs(5));
        assert_eq!(config.location_timeout, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_dedups_and_returns_to_idle() {
        let central = Arc::new(
            MockCentral::new()
                .with_device("id-1", "NeerScan-01")
                .with_device("id-2", "Thermometer")
                .with_device("id-1", "NeerScan-01")
                .with_device("id-3", "NeerScan-03"),
        );
        let session = DeviceSession::builder(Arc::clone(&central)).build().unwrap();

        let started = tokio::time::Instant::now();
        let devices = session.scan().await.unwrap();

        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["id-1", "id-3"]);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(central.stop_scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_early_on_request() {
        let session = Arc::new(DeviceSession::builder(central()).build().unwrap());

        let scanner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.scan().await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(session.state(), SessionState::Scanning);
        session.stop_scan();

        let devices = scanner.await.unwrap().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_ends_with_stream() {
        let central = Arc::new(
            MockCentral::new()
                .with_device("id-1", "NeerScan-01")
                .finite_scan(),
        );
        let session = DeviceSession::builder(central).build().unwrap();

        let started = tokio::time::Instant::now();
        let devices = session.scan().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// A permission prompt the user never answers.
    struct UnansweredPrompt;

    #[async_trait::async_trait]
    impl PermissionGate for UnansweredPrompt {
        async fn request(&self, _permissions: &[Permission]) -> bool {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_permission_prompt_ends_scan() {
        let central = central();
        let session = Arc::new(
            DeviceSession::builder(Arc::clone(&central))
                .permissions(UnansweredPrompt)
                .build()
                .unwrap(),
        );

        let started = tokio::time::Instant::now();
        let scanner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.scan().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.close().await;

        let devices = scanner.await.unwrap().unwrap();
        assert!(devices.is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(central.stop_scan_count(), 0);
    }

    #[tokio::test]
    async fn test_scan_requires_permissions() {
        let permissions = StaticPermissions::denying(&[Permission::BluetoothScan]);
        let session = DeviceSession::builder(central())
            .permissions(permissions.clone())
            .build()
            .unwrap();

        let err = session.scan().await.unwrap_err();
        assert!(matches!(err, Error::ScanPermissionDenied));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(
            permissions.requests(),
            vec![vec![
                Permission::BluetoothScan,
                Permission::BluetoothConnect,
                Permission::Location
            ]]
        );
    }

    #[tokio::test]
    async fn test_connect_subscribes() {
        let central = central();
        let session = connected(&central, Arc::new(MemorySink::new())).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Subscribed);
        assert_eq!(snapshot.device_id.as_deref(), Some(DEVICE));
        assert!(snapshot.error.is_none());
        assert_eq!(central.active_subscriptions(), 1);

        session.close().await;
    }

    #[tokio::test]
    async fn test_notifications_merge_classify_and_persist() {
        let central = central();
        let sink = Arc::new(MemorySink::new());
        let session = connected(&central, Arc::clone(&sink)).await;
        let mut events = session.events();

        assert!(central.notify(br#"{"pH":7.0}"#));
        assert!(central.notify(br#"{"TDS":300}"#));
        wait_until(&session, |s| s.reading.tds.is_some()).await;
        assert!(sink.readings().is_empty());

        assert!(central.notify(br#"{"Turbidity":2}"#));
        next_event(&mut events, is_persisted).await;
        assert!(session.snapshot().verdict.is_safe);
        assert_eq!(sink.readings().len(), 1);

        // A single-field update alone is not a new complete reading.
        assert!(central.notify(br#"{"pH":5.0}"#));
        let snapshot = wait_until(&session, |s| s.reading.ph == Some(5.0)).await;
        assert!(!snapshot.verdict.is_safe);
        assert_eq!(snapshot.reading.tds, Some(300.0));
        assert_eq!(sink.readings().len(), 1);

        assert!(central.notify(br#"{"TDS":320,"Turbidity":1.5}"#));
        next_event(&mut events, is_persisted).await;
        let saved = sink.readings();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].ph, Some(7.0));
        assert_eq!(saved[1].ph, Some(5.0));
        assert_eq!(saved[1].turbidity, Some(1.5));

        session.close().await;
    }

    #[tokio::test]
    async fn test_malformed_notification_is_isolated() {
        let central = central();
        let session = connected(&central, Arc::new(MemorySink::new())).await;
        let mut events = session.events();

        assert!(central.notify(b"{not json"));
        assert!(central.notify(br#"{"pH":7.3}"#));
        let snapshot = wait_until(&session, |s| s.reading.ph.is_some()).await;
        assert_eq!(snapshot.state, SessionState::Subscribed);

        let mut decode_failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::DecodeFailed { .. }) {
                decode_failures += 1;
            }
        }
        assert_eq!(decode_failures, 1);

        session.close().await;
    }

    #[tokio::test]
    async fn test_missing_service_releases_connection() {
        let central = Arc::new(
            MockCentral::new()
                .with_device(DEVICE, "NeerScan-01")
                .with_services(vec![(uuids::SENSOR_SERVICE, Uuid::nil())]),
        );
        let session = DeviceSession::builder(Arc::clone(&central)).build().unwrap();

        let err = session.connect(DEVICE).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connect(ConnectError::ServiceNotFound { .. })
        ));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Error);
        assert!(matches!(
            snapshot.error,
            Some(ConnectError::ServiceNotFound { .. })
        ));
        assert_eq!(central.connect_count(), 1);
        assert_eq!(central.disconnect_count(), 1);
        assert_eq!(central.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_releases_open_link() {
        let central = Arc::new(
            MockCentral::new()
                .with_device(DEVICE, "NeerScan-01")
                .with_stalled_discovery(),
        );
        let session = DeviceSession::builder(Arc::clone(&central))
            .config(SessionConfig::default().connect_timeout(Duration::from_secs(3)))
            .build()
            .unwrap();

        let started = tokio::time::Instant::now();
        let err = session.connect(DEVICE).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(matches!(
            err,
            Error::Connect(ConnectError::LinkFailure(ref msg)) if msg.contains("timed out")
        ));

        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(central.connect_count(), 1);
        assert_eq!(central.disconnect_count(), central.connect_count());
        assert_eq!(central.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_abandons_pending_connect() {
        let central = Arc::new(
            MockCentral::new()
                .with_device(DEVICE, "NeerScan-01")
                .with_stalled_discovery(),
        );
        let session = Arc::new(DeviceSession::builder(Arc::clone(&central)).build().unwrap());

        let connecting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect(DEVICE).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.state(), SessionState::Connecting);

        session.close().await;
        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Connect(ConnectError::LinkFailure(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(central.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_permission_refused() {
        let central = central();
        let session = DeviceSession::builder(Arc::clone(&central))
            .permissions(StaticPermissions::denying(&[Permission::BluetoothConnect]))
            .build()
            .unwrap();

        let err = session.connect(DEVICE).await.unwrap_err();
        assert!(matches!(err, Error::Connect(ConnectError::NoPermission)));
        assert_eq!(session.snapshot().error, Some(ConnectError::NoPermission));
        assert_eq!(central.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_link_failure_on_connect() {
        let central = central();
        central.fail_connect(Some(ConnectError::link("out of range")));
        let session = DeviceSession::builder(Arc::clone(&central)).build().unwrap();

        let err = session.connect(DEVICE).await.unwrap_err();
        assert!(matches!(err, Error::Connect(ConnectError::LinkFailure(_))));
        assert_eq!(session.state(), SessionState::Error);

        // A fresh attempt after the failure may succeed.
        central.fail_connect(None);
        session.connect(DEVICE).await.unwrap();
        assert_eq!(session.state(), SessionState::Subscribed);
        assert!(session.snapshot().error.is_none());
        session.close().await;
    }

    #[tokio::test]
    async fn test_link_loss_moves_to_error() {
        let central = central();
        let session = connected(&central, Arc::new(MemorySink::new())).await;

        central.drop_link();
        let snapshot = wait_until(&session, |s| s.state == SessionState::Error).await;
        assert!(matches!(snapshot.error, Some(ConnectError::LinkFailure(_))));

        // on_link_lost releases before publishing the Error state
        assert_eq!(central.disconnect_count(), 1);
        assert_eq!(central.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let central = central();
        let session = connected(&central, Arc::new(MemorySink::new())).await;

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        assert_eq!(central.disconnect_count(), 1);
        assert_eq!(central.active_subscriptions(), 0);
        assert!(!central.notify(br#"{"pH":7.0}"#));
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let session = DeviceSession::builder(central()).build().unwrap();
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_reconnect_releases_previous_subscription() {
        let central = central();
        let session = connected(&central, Arc::new(MemorySink::new())).await;

        session.connect("AA:BB:CC:DD:EE:02").await.unwrap();
        assert_eq!(central.connect_count(), 2);
        assert_eq!(central.disconnect_count(), 1);
        assert_eq!(central.active_subscriptions(), 1);
        assert_eq!(
            session.snapshot().device_id.as_deref(),
            Some("AA:BB:CC:DD:EE:02")
        );
        assert!(!session.snapshot().reading.has_data());

        session.close().await;
    }

    #[tokio::test]
    async fn test_scan_rejected_while_subscribed() {
        let central = central();
        let session = connected(&central, Arc::new(MemorySink::new())).await;

        let err = session.scan().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { operation: "scan", .. }));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_gates_readiness() {
        let central = central();
        let session = connected(&central, Arc::new(MemorySink::new())).await;

        central.notify(br#"{"pH":7.0}"#);
        let snapshot = wait_until(&session, |s| s.reading.has_data()).await;
        assert!(!snapshot.is_ready());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = wait_until(&session, |s| s.grace_elapsed).await;
        assert!(snapshot.is_ready());

        session.close().await;
    }

    #[tokio::test]
    async fn test_location_stamped_on_reading() {
        let central = central();
        let sink = Arc::new(MemorySink::new());
        let session = DeviceSession::builder(Arc::clone(&central))
            .location(FixedLocation::new(12.971_598_7, 77.594_562_1))
            .sink(Arc::clone(&sink) as Arc<dyn ReadingSink>)
            .build()
            .unwrap();
        let mut events = session.events();
        session.connect(DEVICE).await.unwrap();

        let snapshot = wait_until(&session, |s| s.reading.location.is_some()).await;
        assert_eq!(snapshot.location_display(), "Lat: 12.9716, Lon: 77.5946");

        central.notify(br#"{"pH":7.0,"TDS":300,"Turbidity":2}"#);
        next_event(&mut events, is_persisted).await;
        assert_eq!(
            sink.readings()[0].location.as_deref(),
            Some("Lat: 12.9716, Lon: 77.5946")
        );

        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_timeout_uses_placeholder() {
        let central = central();
        let session = DeviceSession::builder(Arc::clone(&central))
            .location(PendingLocation)
            .build()
            .unwrap();
        session.connect(DEVICE).await.unwrap();
        assert_eq!(session.snapshot().location_display(), "Fetching location...");

        let snapshot = wait_until(&session, |s| s.reading.location.is_some()).await;
        assert_eq!(snapshot.location_display(), NOT_AVAILABLE);

        session.close().await;
    }

    #[tokio::test]
    async fn test_location_permission_denied_placeholder() {
        let session = DeviceSession::builder(central())
            .permissions(StaticPermissions::denying(&[Permission::Location]))
            .location(FixedLocation::new(1.0, 2.0))
            .build()
            .unwrap();
        session.connect(DEVICE).await.unwrap();

        let snapshot = wait_until(&session, |s| s.reading.location.is_some()).await;
        assert_eq!(snapshot.location_display(), PERMISSION_DENIED);
        session.close().await;
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_session() {
        let central = central();
        let sink = Arc::new(MemorySink::new());
        sink.set_failing(true);
        let session = connected(&central, Arc::clone(&sink)).await;
        let mut events = session.events();

        central.notify(br#"{"pH":7.0,"TDS":300,"Turbidity":2}"#);
        next_event(&mut events, |e| {
            matches!(e, SessionEvent::PersistenceFailed { .. })
        })
        .await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Subscribed);
        assert!(snapshot.reading.is_complete());
        assert!(sink.readings().is_empty());

        session.close().await;
    }

    #[tokio::test]
    async fn test_state_events_published() {
        let central = central();
        let session = DeviceSession::builder(Arc::clone(&central)).build().unwrap();
        let mut events = session.events();

        session.connect(DEVICE).await.unwrap();
        session.close().await;

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::Subscribed,
                SessionState::Closed
            ]
        );
    }

    #[tokio::test]
    async fn test_drop_performs_best_effort_disconnect() {
        let central = central();
        let session = connected(&central, Arc::new(MemorySink::new())).await;
        drop(session);

        for _ in 0..10 {
            if central.disconnect_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(central.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_session_slot_closes_previous() {
        let central = central();
        let slot = SessionSlot::new();

        let first = slot
            .replace(DeviceSession::builder(Arc::clone(&central)).build().unwrap())
            .await;
        first.connect(DEVICE).await.unwrap();

        let second = slot
            .replace(DeviceSession::builder(Arc::clone(&central)).build().unwrap())
            .await;
        assert_eq!(first.state(), SessionState::Closed);
        assert_eq!(second.state(), SessionState::Idle);
        assert_eq!(central.active_subscriptions(), 0);

        slot.clear().await;
        assert!(slot.current().await.is_none());
        assert_eq!(second.state(), SessionState::Closed);
    }
}
