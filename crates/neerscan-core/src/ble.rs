//! Production [`BleCentral`] backed by btleplug.
//!
//! Device identifiers follow the platform convention: the Bluetooth MAC
//! address on Linux and Windows, the CoreBluetooth peripheral UUID on macOS
//! (where addresses are reported as `00:00:00:00:00:00`).

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use futures::future::ready;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use neerscan_types::DeviceDescriptor;

use crate::error::{ConnectError, Error, Result};
use crate::traits::{BleCentral, DeviceStream, NotificationStream};

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the adapter cache is polled while scanning for a device.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Address reported by platforms that do not expose the real one.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Format a peripheral ID as a plain string.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Connection identifier for a peripheral: its address, or the peripheral ID
/// when the platform hides addresses.
pub fn create_identifier(address: &BDAddr, peripheral_id: &PeripheralId) -> String {
    let address = address.to_string();
    if address == HIDDEN_ADDRESS {
        format_peripheral_id(peripheral_id)
    } else {
        address
    }
}

/// Compare two identifiers, ignoring case and address separators.
fn same_identifier(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.chars()
            .filter(|c| *c != ':' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect::<String>()
    };
    normalize(a) == normalize(b)
}

/// An open btleplug connection.
#[derive(Debug, Clone)]
pub struct BtleConnection {
    peripheral: Peripheral,
    id: String,
}

impl BtleConnection {
    /// Identifier the connection was opened with.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn find_characteristic(&self, service: Uuid, characteristic: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
    }
}

/// [`BleCentral`] implementation on top of a btleplug adapter.
#[derive(Debug, Clone)]
pub struct BtleCentral {
    adapter: Adapter,
    connect_timeout: Duration,
    discovery_timeout: Duration,
}

impl BtleCentral {
    /// Use the first Bluetooth adapter on this host.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    async fn find_peripheral(&self, identifier: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            let id = format_peripheral_id(&peripheral.id());
            if same_identifier(&id, identifier) {
                debug!("Matched by peripheral ID: {}", id);
                return Ok(Some(peripheral));
            }
            if let Ok(Some(props)) = peripheral.properties().await {
                let address = props.address.to_string();
                if address != HIDDEN_ADDRESS && same_identifier(&address, identifier) {
                    debug!("Matched by address: {}", address);
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }

    /// Scan until a peripheral with `identifier` shows up or the connect
    /// timeout expires.
    async fn scan_for(&self, identifier: &str) -> Result<Option<Peripheral>> {
        debug!("{} not cached, scanning", identifier);
        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        let found = loop {
            if let Some(peripheral) = self.find_peripheral(identifier).await? {
                break Some(peripheral);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        Ok(found)
    }
}

async fn describe(adapter: &Adapter, id: &PeripheralId, prefix: &str) -> Option<DeviceDescriptor> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok()??;
    let name = props.local_name?;
    if !name.starts_with(prefix) {
        return None;
    }
    Some(DeviceDescriptor::new(create_identifier(&props.address, id), name))
}

#[async_trait]
impl BleCentral for BtleCentral {
    type Connection = BtleConnection;

    async fn start_scan(&self, name_prefix: &str) -> Result<DeviceStream> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning for devices named {}*", name_prefix);

        let adapter = self.adapter.clone();
        let prefix = name_prefix.to_string();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let prefix = prefix.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        describe(&adapter, &id, &prefix).await
                    }
                    _ => None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<BtleConnection> {
        let peripheral = match self.find_peripheral(id).await? {
            Some(peripheral) => peripheral,
            None => self.scan_for(id).await?.ok_or_else(|| {
                ConnectError::LinkFailure(format!("device '{id}' not found"))
            })?,
        };

        info!("Connecting to {}...", id);
        timeout(self.connect_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect", self.connect_timeout))??;
        info!("Connected to {}", id);

        Ok(BtleConnection {
            peripheral,
            id: id.to_string(),
        })
    }

    async fn discover_services(&self, conn: &BtleConnection) -> Result<Vec<(Uuid, Uuid)>> {
        timeout(self.discovery_timeout, conn.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover_services", self.discovery_timeout))??;

        let pairs: Vec<(Uuid, Uuid)> = conn
            .peripheral
            .services()
            .into_iter()
            .flat_map(|service| {
                service
                    .characteristics
                    .into_iter()
                    .map(move |c| (service.uuid, c.uuid))
            })
            .collect();
        debug!("Discovered {} characteristics on {}", pairs.len(), conn.id);
        Ok(pairs)
    }

    async fn subscribe(
        &self,
        conn: &BtleConnection,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let target = conn.find_characteristic(service, characteristic).ok_or_else(|| {
            ConnectError::ServiceNotFound {
                service: service.to_string(),
                characteristic: characteristic.to_string(),
            }
        })?;

        // Open the stream first so no notification is missed.
        let notifications = conn.peripheral.notifications().await?;
        conn.peripheral.subscribe(&target).await?;

        let stream = notifications
            .filter(move |n| ready(n.uuid == characteristic))
            .map(|n| n.value);
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(
        &self,
        conn: &BtleConnection,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<()> {
        match conn.find_characteristic(service, characteristic) {
            Some(target) => {
                conn.peripheral.unsubscribe(&target).await?;
                Ok(())
            }
            None => {
                warn!("Unsubscribe requested for unknown characteristic {}", characteristic);
                Ok(())
            }
        }
    }

    async fn disconnect(&self, conn: &BtleConnection) -> Result<()> {
        info!("Disconnecting from {}...", conn.id);
        conn.peripheral.disconnect().await?;
        Ok(())
    }
}
