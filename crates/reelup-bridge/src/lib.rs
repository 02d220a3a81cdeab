//! Reelup Bridge
//!
//! Drives the Reelup agent CLI as a subprocess so a desktop shell or terminal
//! front-end can check auth, manage remote assets and upload videos with live
//! progress.

pub mod core;
pub mod ipc;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::bridge::{
    resolve_executable, BridgeConfig, CancelHandle, CommandDispatcher, ResolvedExecutable,
};
use crate::core::settings::{BridgeSettings, SettingsManager};
use crate::ipc::EventEmitter;

/// Shared state behind every IPC command.
pub struct AppState {
    dispatcher: CommandDispatcher,
    settings: SettingsManager,
    emitter: Arc<dyn EventEmitter>,
    /// Cancel handles of in-flight uploads, by upload ID
    pub(crate) uploads: Mutex<HashMap<String, CancelHandle>>,
}

impl AppState {
    /// Loads settings from `data_dir` and resolves the CLI once.
    pub fn new(data_dir: PathBuf, emitter: Arc<dyn EventEmitter>) -> Self {
        let settings = SettingsManager::new(data_dir);
        let (config, _) = bridge_config(&settings.load());
        Self::with_config(config, settings, emitter)
    }

    /// Builds state around an explicit configuration.
    pub fn with_config(
        config: BridgeConfig,
        settings: SettingsManager,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(config),
            settings,
            emitter,
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.settings
    }

    pub fn emitter(&self) -> &dyn EventEmitter {
        self.emitter.as_ref()
    }

    /// IDs of uploads that can currently be cancelled.
    pub async fn active_uploads(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.uploads.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Derives the dispatcher configuration from persisted settings.
pub fn bridge_config(settings: &BridgeSettings) -> (BridgeConfig, ResolvedExecutable) {
    let resolved = resolve_executable(settings.executable_path.as_deref());
    let config = BridgeConfig::new(resolved.path.clone())
        .with_default_timeout(settings.default_timeout())
        .with_upload_timeout(settings.upload_timeout());
    (config, resolved)
}
