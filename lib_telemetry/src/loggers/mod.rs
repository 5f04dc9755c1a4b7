//! # Logging Bootstrap
//!
//! Installs the global `tracing` subscriber used by the binaries.
//!
//! Logging is set up to:
//! - Honour `RUST_LOG` when it is set, otherwise use the configured level.
//! - Write human-readable lines with ANSI colors to the console.
//! - Write to a daily rolling file through a non-blocking writer, as JSON or
//!   as plain text.
//! - Prune old log files on startup, keeping the newest few.

use std::fs;
use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, TelemetryError};

/// File name prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "server_telemetry.log";

/// # Setup Logging
///
/// Builds and installs the subscriber. The returned guard flushes the file
/// writer when dropped, so the caller must keep it alive for the lifetime of
/// the process.
///
/// # Arguments
/// * `log_dir` - Directory of the rolling log files, created if missing.
/// * `log_level` - Filter directive used when `RUST_LOG` is absent (e.g., "info").
/// * `json` - Write the file log as JSON lines.
/// * `keep` - How many existing log files survive the startup pruning.
pub fn setup_logging(log_dir: &Path, log_level: &str, json: bool, keep: usize) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir).map_err(|e| {
        TelemetryError::Logging(format!("cannot create log directory {}: {}", log_dir.display(), e))
    })?;
    let pruned = prune_old_logs(log_dir, LOG_FILE_PREFIX, keep)?;

    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| TelemetryError::Logging(format!("invalid log level '{}': {}", log_level, e)))?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let json_layer = json.then(|| fmt::layer().json().with_ansi(false).with_writer(writer.clone()));
    let text_layer = (!json).then(|| fmt::layer().with_ansi(false).with_writer(writer));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetryError::Logging(format!("subscriber already installed: {}", e)))?;

    info!(log_dir = %log_dir.display(), log_level, json, pruned, "logging initialized");
    Ok(guard)
}

/// Deletes all but the `keep` newest files in `log_dir` whose name starts with
/// `prefix`. Rolling file names end in the date, so name order is age order.
/// Returns how many files were removed.
pub fn prune_old_logs(log_dir: &Path, prefix: &str, keep: usize) -> Result<usize> {
    let entries = fs::read_dir(log_dir).map_err(|e| {
        TelemetryError::Logging(format!("cannot read log directory {}: {}", log_dir.display(), e))
    })?;

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix))
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for name in names.iter().skip(keep) {
        match fs::remove_file(log_dir.join(name)) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {}", name, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn prune_keeps_the_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for day in ["2026-10-12", "2026-10-13", "2026-10-14", "2026-10-15"] {
            touch(dir.path(), &format!("{}.{}", LOG_FILE_PREFIX, day));
        }
        touch(dir.path(), "unrelated.txt");

        assert_eq!(prune_old_logs(dir.path(), LOG_FILE_PREFIX, 2).unwrap(), 2);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                format!("{}.2026-10-14", LOG_FILE_PREFIX),
                format!("{}.2026-10-15", LOG_FILE_PREFIX),
                "unrelated.txt".to_string(),
            ]
        );
    }

    #[test]
    fn prune_with_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &format!("{}.2026-10-15", LOG_FILE_PREFIX));
        assert_eq!(prune_old_logs(dir.path(), LOG_FILE_PREFIX, 5).unwrap(), 0);
    }

    #[test]
    fn setup_creates_directory_and_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");
        let guard = setup_logging(&log_dir, "debug", true, 3).unwrap();
        assert!(log_dir.is_dir());
        tracing::info!("written through the file layer");

        let second = setup_logging(&log_dir, "info", false, 3);
        assert!(matches!(second, Err(TelemetryError::Logging(_))));
        drop(guard);
    }
}
