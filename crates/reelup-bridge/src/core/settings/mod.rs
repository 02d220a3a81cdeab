//! Settings Persistence System
//!
//! Provides persistent bridge settings with:
//! - Atomic file writes (temp file + rename)
//! - Tolerant loading with defaults and clamping
//! - Migration support for schema changes
//!
//! Storage location: {app_data_dir}/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Settings errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to create settings directory: {0}")]
    CreateDir(#[source] std::io::Error),

    #[error("Failed to lock settings file: {0}")]
    Lock(#[source] std::io::Error),

    #[error("Failed to read settings file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to write settings file: {0}")]
    Write(#[source] std::io::Error),
}

/// Result type for settings operations
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Explicit location of the agent CLI
    #[serde(default)]
    pub executable_path: Option<String>,

    /// Bound for every operation except upload, in seconds
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Bound for uploads, in seconds
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_upload_timeout_secs() -> u64 {
    2 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            executable_path: None,
            default_timeout_secs: default_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Bad values are corrected instead of rejected, so a hand-edited file
    /// cannot keep the bridge from starting.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        self.executable_path = self
            .executable_path
            .take()
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty());

        self.default_timeout_secs = self.default_timeout_secs.clamp(1, 600);
        self.upload_timeout_secs = self.upload_timeout_secs.clamp(60, 86_400);

        self.log_level = normalize_enum(&self.log_level, LOG_LEVELS, default_log_level());
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

fn normalize_enum(value: &str, allowed: &[&str], fallback: String) -> String {
    let value = value.trim();
    if allowed.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        value.to_ascii_lowercase()
    } else {
        fallback
    }
}

/// Settings manager for loading, saving, and resetting settings
#[derive(Debug)]
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager with the given app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        Self {
            settings_path: app_data_dir.join(SETTINGS_FILE),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(
        &self,
        exclusive: bool,
        op: impl FnOnce() -> SettingsResult<T>,
    ) -> SettingsResult<T> {
        // The lock file lives next to the settings file.
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::CreateDir)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(SettingsError::Lock)?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file).map_err(SettingsError::Lock)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file).map_err(SettingsError::Lock)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or
    /// unreadable
    pub fn load(&self) -> BridgeSettings {
        match self.try_load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                BridgeSettings::default()
            }
        }
    }

    /// Load settings, surfacing read and parse failures
    pub fn try_load(&self) -> SettingsResult<BridgeSettings> {
        self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(BridgeSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path).map_err(SettingsError::Read)?;
            let mut settings = serde_json::from_str::<BridgeSettings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
                settings = self.migrate(settings);
            }

            settings.normalize();
            Ok(settings)
        })
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &BridgeSettings) -> SettingsResult<BridgeSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_string_pretty(&normalized)?;

            // Note: std::fs::rename does not overwrite on Windows.
            let temp_path = self.settings_path.with_extension("json.tmp");
            if temp_path.exists() {
                let _ = fs::remove_file(&temp_path);
            }

            let mut file = fs::File::create(&temp_path).map_err(SettingsError::Write)?;
            file.write_all(content.as_bytes())
                .map_err(SettingsError::Write)?;
            file.sync_all().map_err(SettingsError::Write)?;
            drop(file);

            if cfg!(windows) {
                let backup_path = self.settings_path.with_extension("json.bak");
                if backup_path.exists() {
                    let _ = fs::remove_file(&backup_path);
                }

                if self.settings_path.exists() {
                    fs::rename(&self.settings_path, &backup_path).map_err(SettingsError::Write)?;
                }

                match fs::rename(&temp_path, &self.settings_path) {
                    Ok(()) => {
                        if backup_path.exists() {
                            let _ = fs::remove_file(&backup_path);
                        }
                    }
                    Err(e) => {
                        if backup_path.exists() {
                            let _ = fs::rename(&backup_path, &self.settings_path);
                        }
                        return Err(SettingsError::Write(e));
                    }
                }
            } else {
                fs::rename(&temp_path, &self.settings_path).map_err(SettingsError::Write)?;
            }

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> SettingsResult<BridgeSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path).map_err(SettingsError::Write)?;
                info!("Settings file deleted");
            }
            Ok(BridgeSettings::default())
        })
    }

    /// Migrate settings from older version
    fn migrate(&self, mut settings: BridgeSettings) -> BridgeSettings {
        // Version 0 files predate the upload bound and stored it as 0.
        if settings.version == 0 && settings.upload_timeout_secs == 0 {
            settings.upload_timeout_secs = default_upload_timeout_secs();
        }
        settings.version = SETTINGS_VERSION;
        settings
    }
}
