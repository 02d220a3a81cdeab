//! Local inspection of a user-chosen upload file.
//!
//! select-file never spawns the CLI: the shell presents its own picker and
//! hands the chosen path here for validation before an upload starts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bridge::{BridgeError, BridgeResult};

/// Extensions treated as video, lowercase.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v", "wmv", "flv"];

/// A validated file ready to upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct SelectedFile {
    pub path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub extension: Option<String>,
    pub is_video: bool,
    /// RFC 3339, when the platform reports it
    pub modified_at: Option<String>,
}

pub fn is_video_extension(ext: &str) -> bool {
    VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext))
}

/// Validates the picker result. `None` means the picker was dismissed.
pub async fn inspect_selected_file(path: Option<PathBuf>) -> BridgeResult<Option<SelectedFile>> {
    let Some(path) = path else {
        return Ok(None);
    };

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| unreadable(&path, "File cannot be read", e.to_string()))?;

    if !metadata.is_file() {
        return Err(unreadable(&path, "Not a regular file", String::new()));
    }
    if metadata.len() == 0 {
        return Err(unreadable(&path, "File is empty", String::new()));
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    let is_video = extension.as_deref().map(is_video_extension).unwrap_or(false);
    let modified_at = metadata
        .modified()
        .ok()
        .map(|time| DateTime::<Utc>::from(time).to_rfc3339());

    tracing::debug!("Selected {} ({} bytes)", path.display(), metadata.len());

    Ok(Some(SelectedFile {
        path: path.to_string_lossy().into_owned(),
        file_name,
        size_bytes: metadata.len(),
        extension,
        is_video,
        modified_at,
    }))
}

fn unreadable(path: &Path, message: &str, cause: String) -> BridgeError {
    let diagnostic = if cause.is_empty() {
        path.display().to_string()
    } else {
        format!("{}: {}", path.display(), cause)
    };
    BridgeError::Unknown {
        message: message.to_string(),
        diagnostic,
    }
}
