//! Classify command implementation.

use std::path::PathBuf;

use anyhow::Result;
use neerscan_core::{Reading, classify};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_reading_json, format_reading_text};
use crate::util::write_output;

/// Arguments for the classify command.
pub struct ClassifyArgs<'a> {
    pub ph: Option<f64>,
    pub tds: Option<f64>,
    pub turbidity: Option<f64>,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub opts: &'a FormatOptions,
}

/// Build the reading described by the flags. Omitted values stay unknown.
fn reading_from(ph: Option<f64>, tds: Option<f64>, turbidity: Option<f64>) -> Reading {
    let mut reading = Reading::now();
    reading.ph = ph;
    reading.tds = tds;
    reading.turbidity = turbidity;
    reading
}

pub fn cmd_classify(args: ClassifyArgs<'_>) -> Result<()> {
    let ClassifyArgs {
        ph,
        tds,
        turbidity,
        format,
        output,
        opts,
    } = args;

    let reading = reading_from(ph, tds, turbidity);
    let verdict = classify(&reading);

    let content = match format {
        OutputFormat::Json => format_reading_json(&reading, &verdict, opts)?,
        OutputFormat::Text => format_reading_text(&reading, &verdict, opts),
    };

    write_output(output, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neerscan_core::Purifier;

    #[test]
    fn test_reading_from_keeps_unknowns() {
        let reading = reading_from(Some(7.0), None, Some(2.0));
        assert_eq!(reading.ph, Some(7.0));
        assert!(reading.tds.is_none());
        assert_eq!(reading.turbidity, Some(2.0));
    }

    #[test]
    fn test_classify_writes_json_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("verdict.json");

        cmd_classify(ClassifyArgs {
            ph: Some(7.0),
            tds: Some(600.0),
            turbidity: Some(2.0),
            format: OutputFormat::Json,
            output: Some(&out),
            opts: &FormatOptions::new(true),
        })
        .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(value["verdict"]["isSafe"], false);
        assert_eq!(
            value["verdict"]["recommendedPurifier"],
            serde_json::to_value(Purifier::ReverseOsmosis).unwrap()
        );
    }
}
