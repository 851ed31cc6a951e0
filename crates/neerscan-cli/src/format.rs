//! Output formatting for text and JSON output.

use anyhow::Result;
use neerscan_core::safety::{SafetyVerdict, evaluate};
use neerscan_core::{DeviceDescriptor, Measurement, Reading};
use neerscan_store::LogEntry;
use owo_colors::OwoColorize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::style;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (one document per line).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self {
            no_color,
            compact: false,
        }
    }

    /// Create with compact JSON option.
    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }
}

/// Format a measurement value with its unit, `--` when unknown.
#[must_use]
pub fn format_value(measurement: Measurement, value: Option<f64>) -> String {
    let Some(value) = value else {
        return "--".to_string();
    };
    let number = match measurement {
        Measurement::Ph => format!("{:.2}", value),
        Measurement::Tds => format!("{:.0}", value),
        Measurement::Turbidity => format!("{:.1}", value),
    };
    match measurement.unit() {
        Some(unit) => format!("{} {}", number, unit),
        None => number,
    }
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS` in its own offset.
#[must_use]
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    time::format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
        .ok()
        .and_then(|description| ts.format(&description).ok())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn format_measurement(
    reading: &Reading,
    measurement: Measurement,
    opts: &FormatOptions,
) -> (String, String) {
    let value = reading.get(measurement);
    let badge = value
        .map(|v| style::format_range_status(evaluate(measurement, v), opts.no_color))
        .unwrap_or_default();
    (format_value(measurement, value), badge)
}

// ============================================================================
// Scan formatting
// ============================================================================

#[must_use]
pub fn format_scan_text(
    devices: &[DeviceDescriptor],
    opts: &FormatOptions,
    show_tips: bool,
) -> String {
    use tabled::builder::Builder;

    if devices.is_empty() {
        let mut output = "No NeerScan devices found.\n".to_string();
        if show_tips {
            output.push_str(
                "\nTips:\n  \
                 - Make sure the probe is powered on and in range\n  \
                 - Check that Bluetooth is enabled\n  \
                 - Try a longer scan with --timeout 20\n",
            );
        }
        return output;
    }

    let mut output = format!("Found {} NeerScan device(s):\n\n", devices.len());

    let mut builder = Builder::default();
    builder.push_record(["Name", "Identifier"]);
    for device in devices {
        builder.push_record([device.name.clone(), device.id.clone()]);
    }
    let mut table = builder.build();
    style::apply_table_style(&mut table, opts.no_color);
    output.push_str(&table.to_string());
    output.push('\n');

    if show_tips {
        let hint = format!("neerscan monitor --device {}", devices[0].id);
        let hint = if opts.no_color {
            hint
        } else {
            hint.cyan().to_string()
        };
        output.push_str(&format!("\nTo stream readings: {}\n", hint));
    }

    output
}

pub fn format_scan_json(devices: &[DeviceDescriptor], opts: &FormatOptions) -> Result<String> {
    #[derive(Serialize)]
    struct ScanResult<'a> {
        count: usize,
        devices: &'a [DeviceDescriptor],
    }

    opts.as_json(&ScanResult {
        count: devices.len(),
        devices,
    })
}

// ============================================================================
// Reading formatting
// ============================================================================

/// Multi-line report of a reading, its verdict and the purifier advice.
#[must_use]
pub fn format_reading_text(
    reading: &Reading,
    verdict: &SafetyVerdict,
    opts: &FormatOptions,
) -> String {
    let mut output = style::format_title("Water Quality", opts.no_color);
    output.push('\n');

    for measurement in Measurement::ALL {
        let (value, badge) = format_measurement(reading, measurement, opts);
        output.push_str(&format!(
            "  {:<10} {:<12} {}\n",
            measurement.to_string(),
            value,
            badge
        ));
    }
    if let Some(location) = &reading.location {
        output.push_str(&format!("  {:<10} {}\n", "Location", location));
    }

    output.push('\n');
    output.push_str(&style::format_headline(
        verdict.headline(),
        verdict.is_safe,
        opts.no_color,
    ));
    output.push('\n');

    if !verdict.suggestions.is_empty() {
        output.push_str("\nSuggestions:\n");
        for suggestion in &verdict.suggestions {
            output.push_str(&format!("  - {}\n", suggestion));
        }
    }

    output.push_str(&format!(
        "\nRecommended purifier: {}\n",
        verdict.recommended_purifier
    ));
    output
}

/// One line per reading update, for streaming output.
#[must_use]
pub fn format_monitor_line(
    reading: &Reading,
    verdict: &SafetyVerdict,
    opts: &FormatOptions,
) -> String {
    let mut parts = Vec::with_capacity(Measurement::ALL.len());
    for measurement in Measurement::ALL {
        let (value, badge) = format_measurement(reading, measurement, opts);
        if badge.is_empty() {
            parts.push(format!("{} {}", measurement, value));
        } else {
            parts.push(format!("{} {} {}", measurement, value, badge));
        }
    }

    let summary = if verdict.is_safe { "SAFE" } else { "UNSAFE" };
    let summary = style::format_headline(summary, verdict.is_safe, opts.no_color);

    format!(
        "[{}] {} | {}\n",
        format_timestamp(reading.timestamp),
        parts.join("  "),
        summary
    )
}

pub fn format_reading_json(
    reading: &Reading,
    verdict: &SafetyVerdict,
    opts: &FormatOptions,
) -> Result<String> {
    #[derive(Serialize)]
    struct ReadingJson<'a> {
        reading: &'a Reading,
        verdict: &'a SafetyVerdict,
    }

    opts.as_json(&ReadingJson { reading, verdict })
}

// ============================================================================
// History formatting
// ============================================================================

/// Table of log entries. `total` is the full log size when `entries` is a tail.
#[must_use]
pub fn format_history_text(entries: &[LogEntry], total: usize, opts: &FormatOptions) -> String {
    use tabled::builder::Builder;

    if entries.is_empty() {
        return "No saved readings.\n".to_string();
    }

    let mut output = if entries.len() < total {
        format!("History (last {} of {} readings):\n\n", entries.len(), total)
    } else {
        format!("History ({} readings):\n\n", entries.len())
    };

    let mut builder = Builder::default();
    builder.push_record(["Timestamp", "pH", "TDS", "Turbidity", "Drinkable", "Location"]);
    for entry in entries {
        let reading = &entry.reading;
        let drinkable = match (entry.is_drinkable, opts.no_color) {
            (true, true) => "yes".to_string(),
            (false, true) => "no".to_string(),
            (true, false) => "yes".green().to_string(),
            (false, false) => "no".red().to_string(),
        };
        builder.push_record([
            format_timestamp(reading.timestamp),
            format_value(Measurement::Ph, reading.ph),
            format_value(Measurement::Tds, reading.tds),
            format_value(Measurement::Turbidity, reading.turbidity),
            drinkable,
            reading.location.clone().unwrap_or_else(|| "--".to_string()),
        ]);
    }

    let mut table = builder.build();
    style::apply_table_style(&mut table, opts.no_color);
    output.push_str(&table.to_string());
    output.push('\n');
    output
}

pub fn format_history_json(entries: &[LogEntry], opts: &FormatOptions) -> Result<String> {
    opts.as_json(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neerscan_core::classify;

    fn plain() -> FormatOptions {
        FormatOptions::new(true)
    }

    fn stamp() -> OffsetDateTime {
        // 2025-03-01T10:00:00Z
        OffsetDateTime::from_unix_timestamp(1_740_823_200).unwrap()
    }

    #[test]
    fn test_format_value_units() {
        assert_eq!(format_value(Measurement::Ph, Some(7.123)), "7.12");
        assert_eq!(format_value(Measurement::Tds, Some(320.4)), "320 ppm");
        assert_eq!(format_value(Measurement::Turbidity, Some(1.26)), "1.3 NTU");
        assert_eq!(format_value(Measurement::Tds, None), "--");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(stamp()), "2025-03-01 10:00:00");

        let padded = OffsetDateTime::from_unix_timestamp(1_704_070_805).unwrap();
        assert_eq!(format_timestamp(padded), "2024-01-01 01:00:05");
    }

    #[test]
    fn test_scan_text_empty_with_tips() {
        let text = format_scan_text(&[], &plain(), true);
        assert!(text.contains("No NeerScan devices found"));
        assert!(text.contains("--timeout"));
        assert!(!format_scan_text(&[], &plain(), false).contains("Tips"));
    }

    #[test]
    fn test_scan_text_lists_devices() {
        let devices = vec![
            DeviceDescriptor::new("AA:01", "NeerScan-01"),
            DeviceDescriptor::new("AA:02", "NeerScan-02"),
        ];
        let text = format_scan_text(&devices, &plain(), true);
        assert!(text.contains("Found 2 NeerScan device(s)"));
        assert!(text.contains("NeerScan-02"));
        assert!(text.contains("neerscan monitor --device AA:01"));
    }

    #[test]
    fn test_scan_json_shape() {
        let devices = vec![DeviceDescriptor::new("AA:01", "NeerScan-01")];
        let json = format_scan_json(&devices, &plain()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["devices"][0]["id"], "AA:01");
        assert_eq!(value["devices"][0]["name"], "NeerScan-01");
    }

    #[test]
    fn test_reading_text_safe() {
        let reading = Reading::new(stamp())
            .with_ph(7.0)
            .with_tds(300.0)
            .with_turbidity(2.0);
        let text = format_reading_text(&reading, &classify(&reading), &plain());

        assert!(text.contains("Water is SAFE for drinking."));
        assert!(text.contains("pH level is safe"));
        assert!(text.contains("TDS is in the safe range"));
        assert!(text.contains("Turbidity level is safe"));
        assert!(text.contains("Standard Activated Carbon Filter"));
        assert!(!text.contains("[HIGH]"));
    }

    #[test]
    fn test_reading_text_unsafe_marks_measurement() {
        let reading = Reading::new(stamp())
            .with_ph(7.0)
            .with_tds(600.0)
            .with_turbidity(10.0);
        let text = format_reading_text(&reading, &classify(&reading), &plain());

        assert!(text.contains("Water is NOT safe for drinking!"));
        assert!(text.contains("[HIGH]"));
        assert!(text.contains("UV + UF Filter"));
    }

    #[test]
    fn test_reading_text_unknown_values() {
        let reading = Reading::new(stamp());
        let text = format_reading_text(&reading, &classify(&reading), &plain());
        assert!(text.contains("--"));
        assert!(!text.contains("Suggestions"));
    }

    #[test]
    fn test_monitor_line() {
        let reading = Reading::new(stamp()).with_ph(5.0);
        let line = format_monitor_line(&reading, &classify(&reading), &plain());

        assert!(line.starts_with("[2025-03-01 10:00:00]"));
        assert!(line.contains("pH 5.00 [LOW]"));
        assert!(line.contains("TDS --"));
        assert!(line.ends_with("| UNSAFE\n"));
    }

    #[test]
    fn test_reading_json_compact_single_line() {
        let reading = Reading::new(stamp()).with_ph(7.0);
        let opts = plain().with_compact(true);
        let json = format_reading_json(&reading, &classify(&reading), &opts).unwrap();

        assert_eq!(json.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["reading"]["pH"], 7.0);
        assert_eq!(value["verdict"]["isSafe"], true);
        assert_eq!(value["verdict"]["recommendedPurifier"], "Standard");
    }

    #[test]
    fn test_history_text() {
        let entries = vec![
            LogEntry::new(
                Reading::new(stamp())
                    .with_ph(7.0)
                    .with_tds(300.0)
                    .with_turbidity(1.0),
            ),
            LogEntry::new(Reading::new(stamp()).with_ph(4.0).with_location("Lat: 1.0000, Lon: 2.0000")),
        ];

        let text = format_history_text(&entries, 5, &plain());
        assert!(text.contains("last 2 of 5"));
        assert!(text.contains("yes"));
        assert!(text.contains("no"));
        assert!(text.contains("Lat: 1.0000, Lon: 2.0000"));

        assert!(format_history_text(&entries, 2, &plain()).contains("History (2 readings)"));
        assert_eq!(format_history_text(&[], 0, &plain()), "No saved readings.\n");
    }

    #[test]
    fn test_history_json_keeps_log_field_names() {
        let entries = vec![LogEntry::new(Reading::new(stamp()).with_tds(180.0))];
        let json = format_history_json(&entries, &plain()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value[0]["TDS"], 180.0);
        assert_eq!(value[0]["isDrinkable"], true);
        assert_eq!(value[0]["timestamp"], "2025-03-01T10:00:00Z");
    }
}
