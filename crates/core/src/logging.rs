//! Logging utilities and configuration.
//!
//! Grounded on the teacher's `logging.rs`: dual-output `tracing` (rotating
//! file + terminal), retention-based cleanup on startup, and a `log` crate
//! bridge via `tracing-log`. Adapted from the teacher's Windows
//! `%APPDATA%`-based log directory to a Linux/XDG one via `dirs`, since this
//! engine runs inside a headless meeting-bot container, not a Windows
//! desktop app.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;

/// Returns `$XDG_STATE_HOME/capture-engine/logs` (or the platform-appropriate
/// equivalent via `dirs::state_dir()`), falling back to the current directory
/// if no state directory can be resolved. Creates the directory if missing.
pub fn get_log_dir() -> PathBuf {
    let base = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let log_dir = base.join("capture-engine").join("logs");

    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("warning: failed to create log directory: {e}");
    }

    log_dir
}

/// Deletes log files older than `retention_days` (default 7).
pub fn cleanup_old_logs(log_dir: &Path, retention_days: Option<u64>) {
    let retention_days = retention_days.unwrap_or(DEFAULT_LOG_RETENTION_DAYS);
    let cutoff_time = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(since_epoch) => since_epoch.as_secs().saturating_sub(retention_days * 24 * 60 * 60),
        Err(_) => return,
    };

    let Ok(entries) = fs::read_dir(log_dir) else { return };
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else { continue };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else { continue };
        let Ok(duration) = modified.duration_since(std::time::UNIX_EPOCH) else { continue };
        if duration.as_secs() >= cutoff_time {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => tracing::debug!(file = ?entry.path(), "removed old log file"),
            Err(e) => tracing::warn!(file = ?entry.path(), error = %e, "failed to remove old log file"),
        }
    }
}

pub fn parse_log_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initializes dual-output logging (rotating file + stderr) for the engine
/// and its CLI harness. Bridges the `log` crate so any dependency that logs
/// through it (rather than `tracing`) is still captured.
pub fn init_logging(log_level: Option<Level>, log_to_file: bool, log_to_terminal: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = get_log_dir();
    cleanup_old_logs(&log_dir, Some(DEFAULT_LOG_RETENTION_DAYS));

    let default_level = log_level.unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("capture_engine_core={default_level},capture_engine_cli={default_level}")));

    let mut layers = Vec::new();

    if log_to_file {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "capture-engine.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .boxed();
        layers.push(file_layer);
    }

    if log_to_terminal {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
            .with_line_number(false)
            .with_file(false)
            .boxed();
        layers.push(stderr_layer);
    }

    tracing_subscriber::registry().with(filter).with(layers).try_init()?;

    let _ = tracing_log::LogTracer::init();

    Ok(())
}

/// Initializes logging suitable for `#[tokio::test]`/`#[test]` bodies: a
/// single test-writer layer, never panics if a prior test already initialized
/// a subscriber in the same process.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("capture_engine_core=debug")))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dir_ends_with_the_expected_suffix() {
        let log_dir = get_log_dir();
        assert!(log_dir.ends_with("capture-engine/logs") || log_dir.ends_with("capture-engine\\logs"));
    }

    #[test]
    fn parse_log_level_accepts_known_levels_and_rejects_unknown() {
        assert_eq!(parse_log_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_log_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_log_level("warning"), Some(Level::WARN));
        assert_eq!(parse_log_level("nonsense"), None);
    }

    #[test]
    fn cleanup_old_logs_does_not_panic_on_an_empty_directory() {
        let temp_dir = std::env::temp_dir().join(format!("capture-engine-log-test-{}", std::process::id()));
        let _ = fs::create_dir_all(&temp_dir);
        cleanup_old_logs(&temp_dir, Some(7));
        let _ = fs::remove_dir_all(&temp_dir);
    }
}
