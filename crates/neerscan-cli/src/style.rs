//! Visual styling utilities for the CLI.
//!
//! Spinners for long-running BLE operations, status badges and table styling.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use neerscan_core::safety::RangeStatus;
use owo_colors::OwoColorize;

/// Standard spinner tick characters (Braille dots animation)
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Standard spinner tick interval
const SPINNER_TICK_MS: u64 = 80;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICK_CHARS)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

/// Create a spinner for scanning operations.
pub fn scanning_spinner(timeout_secs: u64) -> ProgressBar {
    spinner(format!(
        "Scanning for NeerScan devices... ({}s)",
        timeout_secs
    ))
}

/// Create a spinner for connecting to a device.
pub fn connecting_spinner(device: &str) -> ProgressBar {
    spinner(format!("Connecting to {}...", device))
}

/// Badge for where a measurement sits relative to its safe range.
pub fn format_range_status(status: RangeStatus, no_color: bool) -> String {
    let label = match status {
        RangeStatus::Low => "LOW",
        RangeStatus::Ok => "OK",
        RangeStatus::High => "HIGH",
    };

    if no_color {
        format!("[{}]", label)
    } else {
        match status {
            RangeStatus::Ok => format!("[{}]", label.green()),
            RangeStatus::Low | RangeStatus::High => format!("[{}]", label.red()),
        }
    }
}

/// Safe/unsafe headline.
pub fn format_headline(headline: &str, is_safe: bool, no_color: bool) -> String {
    if no_color {
        headline.to_string()
    } else if is_safe {
        headline.green().bold().to_string()
    } else {
        headline.red().bold().to_string()
    }
}

/// Format a success message.
pub fn format_success(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[OK] {}", message)
    } else {
        format!("{} {}", "[OK]".green(), message)
    }
}

/// Format a warning message.
pub fn format_warning(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[!!] {}", message)
    } else {
        format!("{} {}", "[!!]".yellow(), message)
    }
}

/// Format a title header.
pub fn format_title(title: &str, no_color: bool) -> String {
    let rule = "━".repeat(title.chars().count());
    if no_color {
        format!("{}\n{}", title, rule)
    } else {
        format!("{}\n{}", title.bold(), rule.dimmed())
    }
}

/// Apply the table style used for all tabular output.
pub fn apply_table_style(table: &mut tabled::Table, no_color: bool) {
    use tabled::settings::Style;
    if no_color {
        table.with(Style::ascii());
    } else {
        table.with(Style::rounded());
    }
}
