//! Event Emission Module
//!
//! Pushes upload progress and auth prompts to whatever presentation layer
//! hosts the bridge. The shell supplies an [`EventEmitter`]; the bridge never
//! depends on a particular UI toolkit.

use serde::{Deserialize, Serialize};

use crate::core::bridge::{ErrorPayload, ProgressEvent, ProgressPhase, UploadResponse};

// =============================================================================
// Event Types
// =============================================================================

/// Event names used for frontend communication
pub mod event_names {
    /// Upload progress event
    pub const UPLOAD_PROGRESS: &str = "upload:progress";
    /// Upload completed event
    pub const UPLOAD_COMPLETED: &str = "upload:completed";
    /// Upload failed or cancelled event
    pub const UPLOAD_FAILED: &str = "upload:failed";
    /// Credentials missing or rejected; the UI should show its login flow
    pub const AUTH_REQUIRED: &str = "auth:required";
}

// =============================================================================
// Event Payloads
// =============================================================================

/// Upload progress event payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressEvent {
    /// Bridge-side upload ID (used for cancellation)
    pub upload_id: String,
    pub phase: ProgressPhase,
    /// Human-readable phase label
    pub label: String,
    /// Progress percentage (0-100), when known
    pub percent: Option<f64>,
    pub file_name: Option<String>,
    pub bytes_uploaded: Option<u64>,
    pub total_bytes: Option<u64>,
    pub current_chunk: Option<u64>,
    pub total_chunks: Option<u64>,
    pub elapsed_seconds: Option<f64>,
    pub asset_id: Option<String>,
    pub message: Option<String>,
}

impl UploadProgressEvent {
    pub fn new(upload_id: &str, event: &ProgressEvent) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            phase: event.phase,
            label: event.phase.label().to_string(),
            percent: event.percent(),
            file_name: event.file_name.clone(),
            bytes_uploaded: event.bytes_uploaded,
            total_bytes: event.total_bytes,
            current_chunk: event.current_chunk,
            total_chunks: event.total_chunks,
            elapsed_seconds: event.elapsed_seconds,
            asset_id: event.asset_id.clone(),
            message: event.message.clone(),
        }
    }
}

/// Upload completed event payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletedEvent {
    pub upload_id: String,
    pub asset_id: String,
    pub playback_id: Option<String>,
}

impl UploadCompletedEvent {
    pub fn new(upload_id: &str, response: &UploadResponse) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            asset_id: response.asset_id.clone(),
            playback_id: response.playback_id.clone(),
        }
    }
}

/// Upload failed event payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailedEvent {
    pub upload_id: String,
    pub error: ErrorPayload,
}

/// Auth required event payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequiredEvent {
    pub message: String,
}

// =============================================================================
// Event Emitter
// =============================================================================

/// Sink for events bound for the presentation layer.
pub trait EventEmitter: Send + Sync {
    fn emit_json(&self, event: &str, payload: serde_json::Value) -> Result<(), String>;
}

/// Emitter that drops every event (headless use, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit_json(&self, _event: &str, _payload: serde_json::Value) -> Result<(), String> {
        Ok(())
    }
}

/// Serializes and emits one event. Failures are logged, never propagated:
/// a closed window must not fail the upload it was watching.
pub fn emit<T: Serialize>(emitter: &dyn EventEmitter, event: &str, payload: &T) {
    let result = serde_json::to_value(payload)
        .map_err(|e| e.to_string())
        .and_then(|value| emitter.emit_json(event, value));
    if let Err(e) = result {
        tracing::warn!("Failed to emit {} event: {}", event, e);
    }
}

/// Emitter that records events, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingEmitter {
    pub events: std::sync::Mutex<Vec<(String, serde_json::Value)>>,
}

#[cfg(test)]
impl RecordingEmitter {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn payloads(&self, name: &str) -> Vec<serde_json::Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[cfg(test)]
impl EventEmitter for RecordingEmitter {
    fn emit_json(&self, event: &str, payload: serde_json::Value) -> Result<(), String> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEmitter;

    impl EventEmitter for FailingEmitter {
        fn emit_json(&self, _event: &str, _payload: serde_json::Value) -> Result<(), String> {
            Err("window closed".to_string())
        }
    }

    #[test]
    fn test_progress_payload_shape() {
        let mut event = ProgressEvent::new(ProgressPhase::UploadingChunk);
        event.current_chunk = Some(1);
        event.total_chunks = Some(4);

        let payload = UploadProgressEvent::new("up-1", &event);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["uploadId"], "up-1");
        assert_eq!(json["phase"], "uploading_chunk");
        assert_eq!(json["label"], "Uploading");
        assert_eq!(json["percent"], 25.0);
        assert_eq!(json["currentChunk"], 1);
    }

    #[test]
    fn test_emit_records_serialized_payload() {
        let emitter = RecordingEmitter::default();
        emit(
            &emitter,
            event_names::AUTH_REQUIRED,
            &AuthRequiredEvent {
                message: "Not logged in".to_string(),
            },
        );
        assert_eq!(emitter.names(), [event_names::AUTH_REQUIRED]);
        assert_eq!(
            emitter.payloads(event_names::AUTH_REQUIRED)[0]["message"],
            "Not logged in"
        );
    }

    #[test]
    fn test_emit_failure_is_swallowed() {
        emit(
            &FailingEmitter,
            event_names::UPLOAD_PROGRESS,
            &AuthRequiredEvent {
                message: String::new(),
            },
        );
        emit(&NoopEmitter, event_names::UPLOAD_PROGRESS, &());
    }
}
