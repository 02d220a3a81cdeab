//! Upload progress events and the relay that hands them to an observer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decoder::{DecodeError, RawEvent};

/// Phases of one upload, in the order the CLI reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    ValidatingFile,
    FileValidated,
    CreatingDirectUpload,
    DirectUploadCreated,
    UploadingFile,
    UploadingChunk,
    FileUploaded,
    WaitingForAsset,
    Completed,
}

impl ProgressPhase {
    pub const ALL: [ProgressPhase; 9] = [
        Self::ValidatingFile,
        Self::FileValidated,
        Self::CreatingDirectUpload,
        Self::DirectUploadCreated,
        Self::UploadingFile,
        Self::UploadingChunk,
        Self::FileUploaded,
        Self::WaitingForAsset,
        Self::Completed,
    ];

    /// Wire name used by the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidatingFile => "validating_file",
            Self::FileValidated => "file_validated",
            Self::CreatingDirectUpload => "creating_direct_upload",
            Self::DirectUploadCreated => "direct_upload_created",
            Self::UploadingFile => "uploading_file",
            Self::UploadingChunk => "uploading_chunk",
            Self::FileUploaded => "file_uploaded",
            Self::WaitingForAsset => "waiting_for_asset",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.as_str() == value)
    }

    /// Position in the nominal upload sequence.
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// Short description suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ValidatingFile => "Validating file",
            Self::FileValidated => "File validated",
            Self::CreatingDirectUpload => "Creating upload",
            Self::DirectUploadCreated => "Upload created",
            Self::UploadingFile => "Uploading",
            Self::UploadingChunk => "Uploading",
            Self::FileUploaded => "File uploaded",
            Self::WaitingForAsset => "Processing asset",
            Self::Completed => "Completed",
        }
    }
}

/// Validated projection of one event line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_uploaded: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    /// An event carrying only its phase.
    pub fn new(phase: ProgressPhase) -> Self {
        Self {
            phase,
            file_name: None,
            file_size: None,
            bytes_uploaded: None,
            total_bytes: None,
            current_chunk: None,
            total_chunks: None,
            elapsed_seconds: None,
            upload_id: None,
            asset_id: None,
            status: None,
            message: None,
        }
    }

    /// Validates the discriminator of a raw event and picks out known fields.
    ///
    /// The discriminator is `phase`, falling back to `type`. Optional fields
    /// with an unexpected JSON type are ignored rather than rejected.
    pub fn from_raw(raw: &RawEvent) -> Result<Self, DecodeError> {
        let phase_value = raw
            .get("phase")
            .or_else(|| raw.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::MissingPhase {
                event: Value::Object(raw.clone()).to_string(),
            })?;
        let phase = ProgressPhase::parse(phase_value).ok_or_else(|| DecodeError::UnknownPhase {
            phase: phase_value.to_string(),
        })?;

        Ok(Self {
            phase,
            file_name: string_field(raw, "fileName"),
            file_size: u64_field(raw, "fileSize"),
            bytes_uploaded: u64_field(raw, "bytesUploaded"),
            total_bytes: u64_field(raw, "totalBytes").or_else(|| u64_field(raw, "fileSize")),
            current_chunk: u64_field(raw, "currentChunk"),
            total_chunks: u64_field(raw, "totalChunks"),
            elapsed_seconds: raw
                .get("elapsedSeconds")
                .or_else(|| raw.get("elapsed"))
                .and_then(Value::as_f64),
            upload_id: string_field(raw, "uploadId"),
            asset_id: string_field(raw, "assetId"),
            status: string_field(raw, "status"),
            message: string_field(raw, "message"),
        })
    }

    /// Completion estimate in percent, when the phase or counters allow one.
    pub fn percent(&self) -> Option<f64> {
        match self.phase {
            ProgressPhase::ValidatingFile
            | ProgressPhase::FileValidated
            | ProgressPhase::CreatingDirectUpload
            | ProgressPhase::DirectUploadCreated => Some(0.0),
            ProgressPhase::FileUploaded
            | ProgressPhase::WaitingForAsset
            | ProgressPhase::Completed => Some(100.0),
            ProgressPhase::UploadingFile | ProgressPhase::UploadingChunk => {
                if let (Some(done), Some(total)) = (self.bytes_uploaded, self.total_bytes) {
                    if total > 0 {
                        return Some(ratio(done, total));
                    }
                }
                match (self.current_chunk, self.total_chunks) {
                    (Some(current), Some(total)) if total > 0 => Some(ratio(current, total)),
                    _ => None,
                }
            }
        }
    }
}

fn ratio(done: u64, total: u64) -> f64 {
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

fn string_field(raw: &RawEvent, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u64_field(raw: &RawEvent, key: &str) -> Option<u64> {
    let value = raw.get(key)?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u64)
    })
}

// =============================================================================
// Relay
// =============================================================================

/// Receives progress for one invocation, in decoded order.
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&ProgressEvent) + Send,
{
    fn on_progress(&mut self, event: &ProgressEvent) {
        self(event)
    }
}

/// Forwards events to an optional observer, one call per event.
pub struct ProgressRelay<'a> {
    observer: Option<&'a mut dyn ProgressObserver>,
    delivered: usize,
}

impl<'a> ProgressRelay<'a> {
    pub fn new(observer: Option<&'a mut dyn ProgressObserver>) -> Self {
        Self {
            observer,
            delivered: 0,
        }
    }

    /// Delivers one event. Without an observer the event is dropped.
    pub fn deliver(&mut self, event: &ProgressEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_progress(event);
            self.delivered += 1;
        }
    }

    /// Delivers a batch in order.
    pub fn deliver_all<'e>(&mut self, events: impl IntoIterator<Item = &'e ProgressEvent>) {
        for event in events {
            self.deliver(event);
        }
    }

    /// Number of events the observer has received.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

/// Convenience form of [`ProgressRelay::deliver_all`].
pub fn deliver(observer: Option<&mut dyn ProgressObserver>, events: &[ProgressEvent]) {
    ProgressRelay::new(observer).deliver_all(events);
}
