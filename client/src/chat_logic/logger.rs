use anyhow::{Context, Result};
use std::path::PathBuf;

use super::config::Config;

const APP_NAME: &str = "chat-tail";

/// Install console and file logging from the resolved configuration.
pub fn setup_logging(config: &Config) -> Result<PathBuf> {
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let level = config.log_level.as_deref().unwrap_or("info");

    let log_path = lib_chat::loggers::setup_logging(&log_dir, level, APP_NAME)
        .with_context(|| format!("Failed to set up logging in {}", log_dir.display()))?;
    log::info!("Logging to {}", log_path.display());
    Ok(log_path)
}
