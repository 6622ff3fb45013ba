//! # Logging Setup
//!
//! Installs the process-wide `log` backend: `fern` writing to stdout and to a
//! timestamped file per run, with older runs' files rotated away.

/// `fern` dispatcher setup and log file rotation.
pub mod setup;

pub use setup::{parse_level, rotate_logs, setup_logging, LoggerError};
