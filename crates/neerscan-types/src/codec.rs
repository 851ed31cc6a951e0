//! Decoding of sensor-data characteristic notifications.
//!
//! The firmware pushes UTF-8 JSON objects such as `{"pH":7.1,"TDS":210,"Turbidity":1.8}`.
//! Each notification may carry any subset of the three keys. Keys that are missing
//! or hold something other than a number are ignored; only payloads that are not a
//! JSON object at all are rejected.

use serde_json::{Map, Value};

use crate::error::{DecodeError, DecodeResult};
use crate::types::PartialReading;

/// JSON key carrying pH.
pub const KEY_PH: &str = "pH";
/// JSON key carrying TDS.
pub const KEY_TDS: &str = "TDS";
/// JSON key carrying turbidity.
pub const KEY_TURBIDITY: &str = "Turbidity";

/// Decode a raw notification payload into a [`PartialReading`].
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the payload is not valid UTF-8, does not
/// parse as JSON, or parses to something other than a JSON object.
///
/// # Examples
///
/// ```
/// use neerscan_types::codec::decode;
///
/// let partial = decode(br#"{"pH": 7.1, "TDS": "n/a"}"#).unwrap();
/// assert_eq!(partial.ph, Some(7.1));
/// assert_eq!(partial.tds, None);
///
/// assert!(decode(b"not json").is_err());
/// ```
#[must_use = "decoding returns a Result that should be handled"]
pub fn decode(raw: &[u8]) -> DecodeResult<PartialReading> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| DecodeError::Malformed(format!("payload is not UTF-8: {e}")))?
        .trim();

    let value: Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::Malformed(format!("payload is not JSON: {e}")))?;

    let Value::Object(object) = value else {
        return Err(DecodeError::Malformed(format!(
            "expected a JSON object, got {}",
            kind_of(&value)
        )));
    };

    Ok(PartialReading {
        ph: number(&object, KEY_PH),
        tds: number(&object, KEY_TDS),
        turbidity: number(&object, KEY_TURBIDITY),
    })
}

fn number(object: &Map<String, Value>, key: &str) -> Option<f64> {
    object
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
