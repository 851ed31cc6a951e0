//! Platform-agnostic types for NeerScan water-quality sensors.
//!
//! This crate holds the data model shared by the session engine
//! (neerscan-core), the reading log (neerscan-store) and the CLI.
//!
//! # Features
//!
//! - Accumulated [`Reading`] and per-notification [`PartialReading`] types
//! - Decoder for the JSON payloads pushed by the sensor characteristic
//! - UUID constants for the sensor service and characteristic
//! - Error types for payload decoding
//!
//! # Example
//!
//! ```
//! use neerscan_types::{Reading, codec};
//!
//! let mut reading = Reading::now().with_tds(200.0);
//! let partial = codec::decode(br#"{"pH":7.1}"#).unwrap();
//! reading.merge(&partial, time::OffsetDateTime::now_utc());
//!
//! assert_eq!(reading.ph, Some(7.1));
//! assert_eq!(reading.tds, Some(200.0));
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod uuid;

pub use codec::decode;
pub use error::{DecodeError, DecodeResult};
pub use types::{DeviceDescriptor, Measurement, PartialReading, Position, Reading};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn test_notification_sequence_builds_complete_reading() {
        let mut reading = Reading::new(OffsetDateTime::UNIX_EPOCH);
        let payloads: [&[u8]; 3] = [br#"{"pH":7.2}"#, br#"{"TDS":250}"#, br#"{"Turbidity":1.1}"#];

        for payload in payloads {
            assert!(!reading.is_complete());
            let partial = decode(payload).unwrap();
            assert!(reading.merge(&partial, OffsetDateTime::UNIX_EPOCH));
        }

        assert!(reading.is_complete());
        assert_eq!(reading.ph, Some(7.2));
        assert_eq!(reading.tds, Some(250.0));
        assert_eq!(reading.turbidity, Some(1.1));
    }

    #[test]
    fn test_malformed_notification_leaves_reading_untouched() {
        let reading = Reading::new(OffsetDateTime::UNIX_EPOCH).with_ph(6.9);
        let before = reading.clone();

        assert!(decode(b"{garbage").is_err());
        assert_eq!(reading, before);
    }

    #[test]
    fn test_uuid_reexport() {
        assert!(uuids::matches(
            "12345678-1234-5678-1234-56789ABCDEF0",
            uuids::SENSOR_SERVICE
        ));
    }
}
