//! Bluetooth UUIDs and advertisement constants for NeerScan devices.

use uuid::{Uuid, uuid};

/// Water-quality service exposed by the NeerScan firmware.
pub const SENSOR_SERVICE: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef0");

/// Characteristic that notifies JSON-encoded sensor values.
pub const SENSOR_DATA: Uuid = uuid!("87654321-4321-6789-4321-fedcba987654");

/// Advertised local-name prefix used to filter discovery results.
pub const DEVICE_NAME_PREFIX: &str = "NeerScan";

/// Parse a UUID string in any letter case.
///
/// Returns `None` for strings that are not valid UUIDs.
pub fn parse(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}

/// Compare a UUID string against a known UUID, ignoring letter case.
pub fn matches(value: &str, expected: Uuid) -> bool {
    parse(value).is_some_and(|u| u == expected)
}
