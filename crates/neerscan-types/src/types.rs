//! Core types for NeerScan sensor data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One of the three quantities measured by a NeerScan probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Measurement {
    /// Acidity (dimensionless pH).
    Ph,
    /// Total dissolved solids in ppm.
    Tds,
    /// Turbidity in NTU.
    Turbidity,
}

impl Measurement {
    /// All measurements in evaluation order.
    pub const ALL: [Measurement; 3] = [Measurement::Ph, Measurement::Tds, Measurement::Turbidity];

    /// Unit suffix used when displaying a value, if any.
    #[must_use]
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            Measurement::Ph => None,
            Measurement::Tds => Some("ppm"),
            Measurement::Turbidity => Some("NTU"),
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Ph => write!(f, "pH"),
            Measurement::Tds => write!(f, "TDS"),
            Measurement::Turbidity => write!(f, "Turbidity"),
        }
    }
}

/// The measurements carried by a single characteristic notification.
///
/// Sensors push values incrementally, so any field may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialReading {
    /// pH, if present in the payload.
    pub ph: Option<f64>,
    /// TDS in ppm, if present in the payload.
    pub tds: Option<f64>,
    /// Turbidity in NTU, if present in the payload.
    pub turbidity: Option<f64>,
}

impl PartialReading {
    /// True when the payload carried no usable measurement.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ph.is_none() && self.tds.is_none() && self.turbidity.is_none()
    }

    /// Whether the given measurement is present.
    #[must_use]
    pub fn contains(&self, measurement: Measurement) -> bool {
        self.get(measurement).is_some()
    }

    /// Value of the given measurement, if present.
    #[must_use]
    pub fn get(&self, measurement: Measurement) -> Option<f64> {
        match measurement {
            Measurement::Ph => self.ph,
            Measurement::Tds => self.tds,
            Measurement::Turbidity => self.turbidity,
        }
    }
}

/// Accumulated water-quality reading for a device session.
///
/// Each measurement stays `None` ("unknown") until the sensor has reported it
/// at least once. A reading is *complete* once all three have been seen.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// pH value.
    #[cfg_attr(feature = "serde", serde(rename = "pH"))]
    pub ph: Option<f64>,
    /// Total dissolved solids in ppm.
    #[cfg_attr(feature = "serde", serde(rename = "TDS"))]
    pub tds: Option<f64>,
    /// Turbidity in NTU.
    pub turbidity: Option<f64>,
    /// When the reading was last updated.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Human-readable location stamp, or a placeholder when unavailable.
    #[cfg_attr(feature = "serde", serde(default))]
    pub location: Option<String>,
}

impl Reading {
    /// Create an empty reading stamped with `timestamp`.
    #[must_use]
    pub fn new(timestamp: OffsetDateTime) -> Self {
        Self {
            ph: None,
            tds: None,
            turbidity: None,
            timestamp,
            location: None,
        }
    }

    /// Create an empty reading stamped with the current UTC time.
    #[must_use]
    pub fn now() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }

    /// Builder-style helper to set pH.
    #[must_use]
    pub fn with_ph(mut self, ph: f64) -> Self {
        self.ph = Some(ph);
        self
    }

    /// Builder-style helper to set TDS.
    #[must_use]
    pub fn with_tds(mut self, tds: f64) -> Self {
        self.tds = Some(tds);
        self
    }

    /// Builder-style helper to set turbidity.
    #[must_use]
    pub fn with_turbidity(mut self, turbidity: f64) -> Self {
        self.turbidity = Some(turbidity);
        self
    }

    /// Builder-style helper to set the location stamp.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Value of the given measurement, if known.
    #[must_use]
    pub fn get(&self, measurement: Measurement) -> Option<f64> {
        match measurement {
            Measurement::Ph => self.ph,
            Measurement::Tds => self.tds,
            Measurement::Turbidity => self.turbidity,
        }
    }

    /// True once all three measurements have been populated.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ph.is_some() && self.tds.is_some() && self.turbidity.is_some()
    }

    /// True if at least one measurement has been populated.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.ph.is_some() || self.tds.is_some() || self.turbidity.is_some()
    }

    /// Merge a decoded notification into this reading.
    ///
    /// Only the fields present in `partial` are overwritten; absent fields keep
    /// their previous value. The timestamp is moved to `at` when anything changed.
    /// Returns `true` if at least one field was updated.
    pub fn merge(&mut self, partial: &PartialReading, at: OffsetDateTime) -> bool {
        if partial.is_empty() {
            return false;
        }
        if let Some(ph) = partial.ph {
            self.ph = Some(ph);
        }
        if let Some(tds) = partial.tds {
            self.tds = Some(tds);
        }
        if let Some(turbidity) = partial.turbidity {
            self.turbidity = Some(turbidity);
        }
        self.timestamp = at;
        true
    }
}

/// A NeerScan peripheral seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceDescriptor {
    /// Connection identifier (MAC address, or a platform UUID on macOS).
    pub id: String,
    /// Advertised local name.
    pub name: String,
}

impl DeviceDescriptor {
    /// Create a new descriptor.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A geographic fix used to stamp readings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Renders the location stamp stored on readings, e.g. `Lat: 12.9716, Lon: 77.5946`.
impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lat: {:.4}, Lon: {:.4}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    #[test]
    fn test_new_reading_is_empty() {
        let reading = Reading::new(epoch());
        assert!(!reading.has_data());
        assert!(!reading.is_complete());
        assert!(reading.location.is_none());
    }

    #[test]
    fn test_merge_overwrites_only_present_fields() {
        let mut reading = Reading::new(epoch()).with_tds(200.0);
        let partial = PartialReading {
            ph: Some(7.1),
            ..Default::default()
        };

        let later = epoch() + time::Duration::seconds(5);
        assert!(reading.merge(&partial, later));

        assert_eq!(reading.ph, Some(7.1));
        assert_eq!(reading.tds, Some(200.0));
        assert_eq!(reading.turbidity, None);
        assert_eq!(reading.timestamp, later);
    }

    #[test]
    fn test_merge_empty_partial_is_noop() {
        let mut reading = Reading::new(epoch()).with_ph(6.9);
        let later = epoch() + time::Duration::seconds(5);

        assert!(!reading.merge(&PartialReading::default(), later));
        assert_eq!(reading.ph, Some(6.9));
        assert_eq!(reading.timestamp, epoch());
    }

    #[test]
    fn test_merge_keeps_location() {
        let mut reading = Reading::new(epoch()).with_location("Lat: 1.0000, Lon: 2.0000");
        let partial = PartialReading {
            turbidity: Some(1.5),
            ..Default::default()
        };
        reading.merge(&partial, epoch());
        assert_eq!(reading.location.as_deref(), Some("Lat: 1.0000, Lon: 2.0000"));
    }

    #[test]
    fn test_completeness_requires_all_three() {
        let reading = Reading::new(epoch()).with_ph(7.0).with_tds(300.0);
        assert!(reading.has_data());
        assert!(!reading.is_complete());

        let reading = reading.with_turbidity(2.0);
        assert!(reading.is_complete());
    }

    #[test]
    fn test_partial_reading_contains() {
        let partial = PartialReading {
            tds: Some(120.0),
            ..Default::default()
        };
        assert!(partial.contains(Measurement::Tds));
        assert!(!partial.contains(Measurement::Ph));
        assert!(!partial.is_empty());
    }

    #[test]
    fn test_position_display_rounds_to_four_places() {
        let pos = Position::new(12.971_598_7, 77.594_562_1);
        assert_eq!(pos.to_string(), "Lat: 12.9716, Lon: 77.5946");
    }

    #[test]
    fn test_device_descriptor_display() {
        let device = DeviceDescriptor::new("AA:BB:CC:DD:EE:FF", "NeerScan-01");
        assert_eq!(device.to_string(), "NeerScan-01 (AA:BB:CC:DD:EE:FF)");
    }

    #[test]
    fn test_measurement_units() {
        assert_eq!(Measurement::Ph.unit(), None);
        assert_eq!(Measurement::Tds.unit(), Some("ppm"));
        assert_eq!(Measurement::Turbidity.unit(), Some("NTU"));
        assert_eq!(Measurement::Ph.to_string(), "pH");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_reading_serializes_with_sensor_field_names() {
        let reading = Reading::new(epoch()).with_ph(7.0).with_tds(300.0);
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"pH\":7.0"));
        assert!(json.contains("\"TDS\":300.0"));
        assert!(json.contains("\"turbidity\":null"));
        assert!(json.contains("1970-01-01T00:00:00Z"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_reading_deserializes_without_location() {
        let json = r#"{"pH":6.8,"TDS":null,"turbidity":3.0,"timestamp":"2025-03-01T10:00:00Z"}"#;
        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.ph, Some(6.8));
        assert_eq!(reading.tds, None);
        assert!(reading.location.is_none());
    }
}
