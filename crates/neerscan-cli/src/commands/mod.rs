//! Command implementations for the CLI.

mod classify;
mod config;
mod history;
mod monitor;
mod scan;

pub use classify::{ClassifyArgs, cmd_classify};
pub use config::cmd_config;
pub use history::cmd_history;
pub use monitor::{MonitorArgs, cmd_monitor};
pub use scan::cmd_scan;
