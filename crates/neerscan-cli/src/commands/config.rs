//! Config command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;

use crate::cli::{ConfigAction, ConfigKey};
use crate::config::Config;
use crate::style;
use crate::util::write_output;

pub fn cmd_config(
    action: ConfigAction,
    output: Option<&PathBuf>,
    no_color: bool,
    config: &Config,
) -> Result<()> {
    let path = Config::path();
    match action {
        ConfigAction::Path => write_output(output, &format!("{}\n", path.display())),
        ConfigAction::Show => {
            let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
            write_output(output, &content)
        }
        ConfigAction::Set { key, value } => {
            let mut updated = config.clone();
            updated.set(key, &value)?;
            updated.save()?;
            report_saved(key, &path, no_color);
            Ok(())
        }
        ConfigAction::Unset { key } => {
            let mut updated = config.clone();
            updated.unset(key);
            updated.save()?;
            report_saved(key, &path, no_color);
            Ok(())
        }
        ConfigAction::Init { force } => {
            init_config(&path, force)?;
            eprintln!(
                "{}",
                style::format_success(
                    &format!("Wrote default configuration to {}", path.display()),
                    no_color
                )
            );
            Ok(())
        }
    }
}

fn report_saved(key: ConfigKey, path: &std::path::Path, no_color: bool) {
    let name = key
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_else(|| format!("{:?}", key));
    eprintln!(
        "{}",
        style::format_success(
            &format!("Updated {} in {}", name, path.display()),
            no_color
        )
    );
}

fn init_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Configuration already exists at {}. Use --force to overwrite it.",
            path.display()
        );
    }
    Config::default().save_to(path)
}
