use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use thiserror::Error;

/// Failures while installing the logger.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The log directory or file could not be created.
    #[error("Log file I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another logger was installed first.
    #[error("A global logger is already installed: {0}")]
    AlreadyInstalled(#[from] log::SetLoggerError),

    /// The rotation pattern was invalid.
    #[error("Invalid log rotation pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Map a level name to a filter. Unknown names fall back to `info`.
pub fn parse_level(level: &str) -> log::LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" => log::LevelFilter::Off,
        "error" | "fatal" => log::LevelFilter::Error,
        "warn" | "warning" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

/// # Setup Logging
///
/// Create `log_dir` if needed, rotate `app_name`'s previous log files (keeping
/// the newest one), and install a dispatcher that writes
/// `[timestamp][target][level] message` to stdout and to
/// `<log_dir>/<app_name>-<timestamp>.log`.
///
/// # Returns
/// The path of the new log file.
pub fn setup_logging(log_dir: &Path, level: &str, app_name: &str) -> Result<PathBuf, LoggerError> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    rotate_logs(app_name, log_dir, 1)?;

    let log_file_name = format!("{}-{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(level))
        .chain(io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    Ok(log_path)
}

/// # Rotate Logs
///
/// Delete all but the `keep` newest `<app_name>-*.log` files in `log_dir`.
/// File names embed a sortable timestamp, so newest means greatest name.
///
/// # Returns
/// The files that were removed.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> Result<Vec<PathBuf>, LoggerError> {
    let pattern = format!(
        "{}/{}-*.log",
        Pattern::escape(&log_dir.display().to_string()),
        Pattern::escape(app_name)
    );

    let mut log_files: Vec<PathBuf> = glob(&pattern)?.filter_map(|entry| entry.ok()).collect();
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = Vec::new();
    for old_file in log_files.into_iter().skip(keep) {
        match fs::remove_file(&old_file) {
            Ok(()) => removed.push(old_file),
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_map_to_filters() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Error);
        assert_eq!(parse_level("trace"), log::LevelFilter::Trace);
        assert_eq!(parse_level("whatever"), log::LevelFilter::Info);
    }

    #[test]
    fn rotation_keeps_the_newest_files_of_one_app() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "chat-tail-2024-01-01_00-00-00.log",
            "chat-tail-2024-03-01_00-00-00.log",
            "chat-tail-2024-02-01_00-00-00.log",
            "other-2020-01-01_00-00-00.log",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        let removed = rotate_logs("chat-tail", dir.path(), 1).unwrap();
        assert_eq!(removed.len(), 2);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec!["chat-tail-2024-03-01_00-00-00.log", "other-2020-01-01_00-00-00.log"]);
    }

    #[test]
    fn rotation_of_an_empty_directory_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert!(rotate_logs("chat-tail", dir.path(), 1).unwrap().is_empty());
    }
}
