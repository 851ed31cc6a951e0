//! Drinking-water safety classification.
//!
//! [`classify`] evaluates each known measurement of a [`Reading`] against a fixed
//! safe range and produces a [`SafetyVerdict`]: an overall safe/unsafe flag, one
//! suggestion per known measurement, and a recommended [`Purifier`].
//!
//! # Example
//!
//! ```
//! use neerscan_core::safety::{Purifier, classify};
//! use neerscan_types::Reading;
//!
//! let reading = Reading::now().with_ph(7.0).with_tds(620.0).with_turbidity(2.0);
//! let verdict = classify(&reading);
//!
//! assert!(!verdict.is_safe);
//! assert_eq!(verdict.recommended_purifier, Purifier::ReverseOsmosis);
//! println!("{}", verdict.headline());
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

use neerscan_types::{Measurement, Reading};

/// Lowest safe pH.
pub const PH_MIN: f64 = 6.5;
/// Highest safe pH.
pub const PH_MAX: f64 = 8.5;
/// Lowest safe TDS in ppm.
pub const TDS_MIN: f64 = 150.0;
/// Highest safe TDS in ppm.
pub const TDS_MAX: f64 = 500.0;
/// Highest safe turbidity in NTU.
pub const TURBIDITY_MAX: f64 = 5.0;

const PH_SAFE: &str = "pH level is safe";
const PH_LOW: &str = "pH too low — add alkaline buffer";
const PH_HIGH: &str = "pH too high — add acidifying agent";
const TDS_SAFE: &str = "TDS is in the safe range";
const TDS_LOW: &str = "TDS too low — add minerals";
const TDS_HIGH: &str = "TDS too high — use reverse-osmosis filter";
const TURBIDITY_SAFE: &str = "Turbidity level is safe";
const TURBIDITY_HIGH: &str = "turbidity too high — use UV/UF purifier";

/// Purification technology recommended for a reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purifier {
    /// Activated-carbon filter, sufficient for water within range.
    #[default]
    Standard,
    /// Reverse osmosis, for excessive dissolved solids.
    ReverseOsmosis,
    /// Ultraviolet plus ultrafiltration, for cloudy water.
    #[serde(rename = "UVUF")]
    UvUf,
}

impl Purifier {
    /// Product-style name shown to users.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Purifier::Standard => "Standard Activated Carbon Filter",
            Purifier::ReverseOsmosis => "Reverse Osmosis (RO)",
            Purifier::UvUf => "UV + UF Filter",
        }
    }
}

impl fmt::Display for Purifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Where a single measurement falls relative to its safe range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeStatus {
    /// Below the safe range.
    Low,
    /// Within the safe range (inclusive).
    Ok,
    /// Above the safe range.
    High,
}

impl RangeStatus {
    /// True for [`RangeStatus::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, RangeStatus::Ok)
    }
}

/// Safe range bounds for a measurement, inclusive. `None` means unbounded.
#[must_use]
pub fn safe_range(measurement: Measurement) -> (Option<f64>, Option<f64>) {
    match measurement {
        Measurement::Ph => (Some(PH_MIN), Some(PH_MAX)),
        Measurement::Tds => (Some(TDS_MIN), Some(TDS_MAX)),
        Measurement::Turbidity => (None, Some(TURBIDITY_MAX)),
    }
}

/// Evaluate a single value against the safe range of `measurement`.
#[must_use]
pub fn evaluate(measurement: Measurement, value: f64) -> RangeStatus {
    let (min, max) = safe_range(measurement);
    if min.is_some_and(|min| value < min) {
        RangeStatus::Low
    } else if max.is_some_and(|max| value > max) {
        RangeStatus::High
    } else {
        RangeStatus::Ok
    }
}

/// Outcome of classifying a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyVerdict {
    /// True when every known measurement is within range.
    pub is_safe: bool,
    /// One message per known measurement, in pH, TDS, turbidity order.
    pub suggestions: Vec<String>,
    /// Purifier that addresses the worst problem found.
    pub recommended_purifier: Purifier,
}

impl SafetyVerdict {
    /// One-line summary suitable for a banner.
    #[must_use]
    pub fn headline(&self) -> &'static str {
        if self.is_safe {
            "Water is SAFE for drinking."
        } else {
            "Water is NOT safe for drinking!"
        }
    }
}

impl Default for SafetyVerdict {
    fn default() -> Self {
        Self {
            is_safe: true,
            suggestions: Vec::new(),
            recommended_purifier: Purifier::Standard,
        }
    }
}

/// Classify a reading.
///
/// Unknown measurements contribute nothing, so an empty reading is safe with no
/// suggestions. Non-finite values are treated as unknown. The turbidity rule is evaluated last and its purifier wins over
/// the TDS one.
#[must_use]
pub fn classify(reading: &Reading) -> SafetyVerdict {
    let mut verdict = SafetyVerdict::default();

    for measurement in Measurement::ALL {
        let Some(value) = reading.get(measurement).filter(|v| v.is_finite()) else {
            continue;
        };
        let status = evaluate(measurement, value);
        if !status.is_ok() {
            verdict.is_safe = false;
        }

        let message = match (measurement, status) {
            (Measurement::Ph, RangeStatus::Low) => PH_LOW,
            (Measurement::Ph, RangeStatus::High) => PH_HIGH,
            (Measurement::Ph, RangeStatus::Ok) => PH_SAFE,
            (Measurement::Tds, RangeStatus::Low) => TDS_LOW,
            (Measurement::Tds, RangeStatus::High) => {
                verdict.recommended_purifier = Purifier::ReverseOsmosis;
                TDS_HIGH
            }
            (Measurement::Tds, RangeStatus::Ok) => TDS_SAFE,
            (Measurement::Turbidity, RangeStatus::High) => {
                verdict.recommended_purifier = Purifier::UvUf;
                TURBIDITY_HIGH
            }
            (Measurement::Turbidity, _) => TURBIDITY_SAFE,
        };
        verdict.suggestions.push(message.to_string());
    }

    verdict
}
