//! Typed success payloads, one per operation.
//!
//! A successful [`TerminalResult`] is decoded into the operation's response
//! type or rejected as malformed; partially typed results are never returned.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decoder::{DecodeError, TerminalResult};
use super::error::{BridgeError, BridgeResult};
use super::operation::OperationKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_authenticated: bool,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub token_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackId {
    pub id: String,
    #[serde(default)]
    pub policy: Option<String>,
}

/// The slice of a remote asset the bridge needs to display a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct AssetSummary {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub passthrough: Option<String>,
    #[serde(default)]
    pub playback_ids: Vec<PlaybackId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde(default)]
    pub assets: Vec<AssetSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub asset_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub asset_id: String,
    #[serde(default)]
    pub playback_id: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Decodes a successful terminal result into `T`.
pub fn decode_success<T: DeserializeOwned>(
    kind: OperationKind,
    terminal: TerminalResult,
) -> BridgeResult<T> {
    let payload = Value::Object(terminal.into_payload());
    serde_json::from_value::<T>(payload.clone()).map_err(|e| {
        let err = DecodeError::InvalidPayload {
            operation: kind.command_name().to_string(),
            reason: e.to_string(),
        };
        tracing::warn!("{}", err);
        BridgeError::MalformedOutput {
            reason: err.to_string(),
            diagnostic: Some(payload.to_string()),
        }
    })
}

/// Delete payloads may omit the id; the requested id is authoritative then.
pub(crate) fn decode_delete(
    terminal: TerminalResult,
    requested: &str,
) -> BridgeResult<DeleteResponse> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Raw {
        #[serde(default)]
        asset_id: Option<String>,
    }

    let raw: Raw = decode_success(OperationKind::Delete, terminal)?;
    Ok(DeleteResponse {
        asset_id: raw.asset_id.unwrap_or_else(|| requested.to_string()),
    })
}

/// Listings report `createdAt` either as a string or as epoch seconds.
pub(crate) fn decode_list(terminal: TerminalResult) -> BridgeResult<ListResponse> {
    let mut payload = terminal.into_payload();
    if let Some(Value::Array(assets)) = payload.get_mut("assets") {
        for asset in assets.iter_mut().filter_map(Value::as_object_mut) {
            let numeric = match asset.get("createdAt") {
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            if let Some(created_at) = numeric {
                asset.insert("createdAt".to_string(), Value::String(created_at));
            }
        }
    }
    let terminal =
        TerminalResult::from_object(payload).map_err(|e| BridgeError::MalformedOutput {
            reason: e.to_string(),
            diagnostic: None,
        })?;
    decode_success(OperationKind::List, terminal)
}
