//! Tracing subscriber setup.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Daily-rolled log file prefix.
pub const LOG_FILE_NAME: &str = "reelup.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Platform log directory, or `.logs` when none is known.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("reelup").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".logs"))
}

/// Platform data directory for settings.
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("reelup"))
        .unwrap_or_else(|| PathBuf::from(".reelup"))
}

/// Installs the global subscriber: console output plus a daily log file.
///
/// `RUST_LOG` wins over `default_level`. Console output goes to stderr so
/// machine-readable stdout stays clean. Calling this twice is a no-op.
pub fn init_logging(log_dir: &Path, default_level: &str) {
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return;
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    // Tests and embedders may already have installed one.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_logging_is_idempotent() {
        let dir = TempDir::new().unwrap();
        init_logging(dir.path(), "debug");
        init_logging(dir.path(), "info");
        tracing::info!("logging initialized");
        assert!(LOG_GUARD.get().is_some());
    }

    #[test]
    fn test_default_dirs_are_named_for_the_app() {
        assert!(default_log_dir().to_string_lossy().contains("logs"));
        assert!(default_data_dir().to_string_lossy().contains("reelup"));
    }
}
