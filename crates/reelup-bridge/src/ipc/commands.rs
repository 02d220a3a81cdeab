//! Bridge Commands
//!
//! One function per caller-facing operation. Each returns either the typed
//! payload or an [`ErrorPayload`]; a `not-authenticated` failure additionally
//! emits `auth:required` so the shell can start its login flow.

use std::path::PathBuf;

use crate::core::bridge::{
    cancel_pair, BridgeError, DeleteResponse, ErrorPayload, ListResponse, LoginResponse,
    LogoutResponse, ProgressEvent, StatusResponse, UploadResponse,
};
use crate::core::files::{inspect_selected_file, SelectedFile};
use crate::core::settings::{BridgeSettings, SettingsError};
use crate::ipc::events::{
    emit, event_names, AuthRequiredEvent, UploadCompletedEvent, UploadFailedEvent,
    UploadProgressEvent,
};
use crate::AppState;

/// Converts a bridge error into its payload, raising `auth:required` first
/// when the CLI needs fresh credentials.
fn report(state: &AppState, err: BridgeError) -> ErrorPayload {
    if err.requires_login() {
        emit(
            state.emitter(),
            event_names::AUTH_REQUIRED,
            &AuthRequiredEvent {
                message: err.to_string(),
            },
        );
    }
    err.into()
}

fn settings_error(err: SettingsError) -> ErrorPayload {
    BridgeError::Unknown {
        message: "Failed to update settings".to_string(),
        diagnostic: err.to_string(),
    }
    .into()
}

/// Gets authentication status of the CLI
pub async fn cli_status(state: &AppState) -> Result<StatusResponse, ErrorPayload> {
    state
        .dispatcher()
        .status()
        .await
        .map_err(|e| report(state, e))
}

/// Logs the CLI in with an access token pair
pub async fn cli_login(
    state: &AppState,
    token_id: String,
    token_secret: String,
) -> Result<LoginResponse, ErrorPayload> {
    state
        .dispatcher()
        .login(token_id, token_secret)
        .await
        .map_err(|e| report(state, e))
}

/// Clears the CLI's stored credentials
pub async fn cli_logout(state: &AppState) -> Result<LogoutResponse, ErrorPayload> {
    state
        .dispatcher()
        .logout()
        .await
        .map_err(|e| report(state, e))
}

/// Lists remote assets
pub async fn cli_list_assets(state: &AppState) -> Result<ListResponse, ErrorPayload> {
    state
        .dispatcher()
        .list()
        .await
        .map_err(|e| report(state, e))
}

/// Deletes one remote asset
pub async fn cli_delete_asset(
    state: &AppState,
    asset_id: String,
) -> Result<DeleteResponse, ErrorPayload> {
    let asset_id = asset_id.trim().to_string();
    if asset_id.is_empty() {
        return Err(BridgeError::Unknown {
            message: "Asset ID is empty".to_string(),
            diagnostic: "assetId: \"\"".to_string(),
        }
        .into());
    }
    state
        .dispatcher()
        .delete(asset_id)
        .await
        .map_err(|e| report(state, e))
}

/// Uploads a local file, emitting `upload:progress` while it runs.
///
/// `upload_id` lets the caller name the upload up front so it can call
/// [`cancel_upload`] before the first progress event arrives; a fresh ID is
/// generated otherwise.
pub async fn cli_upload(
    state: &AppState,
    file_path: String,
    upload_id: Option<String>,
) -> Result<UploadResponse, ErrorPayload> {
    let upload_id = upload_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (handle, signal) = cancel_pair();
    {
        let mut uploads = state.uploads.lock().await;
        if uploads.contains_key(&upload_id) {
            return Err(BridgeError::Unknown {
                message: "An upload with this ID is already running".to_string(),
                diagnostic: format!("uploadId: {}", upload_id),
            }
            .into());
        }
        uploads.insert(upload_id.clone(), handle);
    }

    tracing::info!("Starting upload {} of {}", upload_id, file_path);

    let emitter = state.emitter();
    let mut observer = |event: &ProgressEvent| {
        emit(
            emitter,
            event_names::UPLOAD_PROGRESS,
            &UploadProgressEvent::new(&upload_id, event),
        );
    };
    let result = state
        .dispatcher()
        .upload_with_cancel(PathBuf::from(&file_path), Some(&mut observer), signal)
        .await;

    state.uploads.lock().await.remove(&upload_id);

    match result {
        Ok(response) => {
            emit(
                emitter,
                event_names::UPLOAD_COMPLETED,
                &UploadCompletedEvent::new(&upload_id, &response),
            );
            Ok(response)
        }
        Err(err) => {
            let payload = report(state, err);
            emit(
                emitter,
                event_names::UPLOAD_FAILED,
                &UploadFailedEvent {
                    upload_id: upload_id.clone(),
                    error: payload.clone(),
                },
            );
            Err(payload)
        }
    }
}

/// Cancels an in-flight upload. Returns `false` when no such upload is
/// running.
pub async fn cancel_upload(state: &AppState, upload_id: String) -> Result<bool, ErrorPayload> {
    let handle = state.uploads.lock().await.remove(&upload_id);
    match handle {
        Some(handle) => {
            tracing::info!("Cancelling upload {}", upload_id);
            Ok(handle.cancel())
        }
        None => Ok(false),
    }
}

/// Validates the file a picker returned; `None` means it was dismissed.
pub async fn select_file(path: Option<String>) -> Result<Option<SelectedFile>, ErrorPayload> {
    inspect_selected_file(path.map(PathBuf::from))
        .await
        .map_err(ErrorPayload::from)
}

/// Gets persisted bridge settings
pub async fn get_settings(state: &AppState) -> Result<BridgeSettings, ErrorPayload> {
    Ok(state.settings().load())
}

/// Merges a partial update into the persisted settings.
///
/// Timeouts and the executable path apply from the next start.
pub async fn update_settings(
    state: &AppState,
    partial: serde_json::Value,
) -> Result<BridgeSettings, ErrorPayload> {
    let current = state.settings().load();
    let mut current_json = serde_json::to_value(&current)
        .map_err(|e| settings_error(SettingsError::Parse(e)))?;

    merge_json(&mut current_json, partial);

    let updated: BridgeSettings = serde_json::from_value(current_json)
        .map_err(|e| settings_error(SettingsError::Parse(e)))?;
    state.settings().save(&updated).map_err(settings_error)
}

/// Resets settings to defaults
pub async fn reset_settings(state: &AppState) -> Result<BridgeSettings, ErrorPayload> {
    state.settings().reset().map_err(settings_error)
}

/// Deep merge JSON objects (used for partial settings updates)
fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    use serde_json::Value;
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                let base_value = base_map.entry(key).or_insert(Value::Null);
                merge_json(base_value, patch_value);
            }
        }
        (base, patch) => *base = patch,
    }
}
