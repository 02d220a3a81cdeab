//! Bridge Error Definitions
//!
//! Every call into the bridge resolves to either a typed success payload or
//! exactly one [`BridgeError`]. The variants form a closed taxonomy that the
//! UI layer can branch on through [`BridgeError::kind`] without parsing text.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on raw diagnostic text attached to an error.
pub const DIAGNOSTIC_TAIL_BYTES: usize = 4 * 1024;

/// Closed set of error kinds exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeErrorKind {
    /// Executable missing or could not be spawned
    ProcessNotFound,
    /// The CLI reported a failure through its exit code
    NonZeroExit,
    /// Output violated the line protocol
    MalformedOutput,
    /// The CLI exceeded its allotted time or the call was cancelled
    Timeout,
    /// Credentials are missing or rejected; the caller should re-login
    NotAuthenticated,
    /// Anything else; always carries raw diagnostics
    Unknown,
}

impl BridgeErrorKind {
    /// Wire name of the kind (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessNotFound => "process-not-found",
            Self::NonZeroExit => "non-zero-exit",
            Self::MalformedOutput => "malformed-output",
            Self::Timeout => "timeout",
            Self::NotAuthenticated => "not-authenticated",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BridgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every bridge operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("CLI executable unavailable at {path}: {reason}")]
    ProcessNotFound { path: String, reason: String },

    #[error("{message}")]
    NonZeroExit {
        exit_code: Option<i32>,
        message: String,
        diagnostic: Option<String>,
    },

    #[error("Malformed CLI output: {reason}")]
    MalformedOutput {
        reason: String,
        diagnostic: Option<String>,
    },

    #[error("CLI did not finish within {limit:?}")]
    Timeout {
        limit: Duration,
        diagnostic: Option<String>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{message}")]
    NotAuthenticated { message: String },

    #[error("{message}")]
    Unknown { message: String, diagnostic: String },
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Classification used by callers to pick a recovery path.
    pub fn kind(&self) -> BridgeErrorKind {
        match self {
            Self::ProcessNotFound { .. } => BridgeErrorKind::ProcessNotFound,
            Self::NonZeroExit { .. } => BridgeErrorKind::NonZeroExit,
            Self::MalformedOutput { .. } => BridgeErrorKind::MalformedOutput,
            Self::Timeout { .. } | Self::Cancelled => BridgeErrorKind::Timeout,
            Self::NotAuthenticated { .. } => BridgeErrorKind::NotAuthenticated,
            Self::Unknown { .. } => BridgeErrorKind::Unknown,
        }
    }

    /// Raw diagnostic text (stderr or stdout tail), if any was captured.
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::ProcessNotFound { .. } | Self::Cancelled | Self::NotAuthenticated { .. } => None,
            Self::NonZeroExit { diagnostic, .. }
            | Self::MalformedOutput { diagnostic, .. }
            | Self::Timeout { diagnostic, .. } => diagnostic.as_deref(),
            Self::Unknown { diagnostic, .. } => Some(diagnostic),
        }
    }

    /// Whether the caller should start a credential refresh flow.
    pub fn requires_login(&self) -> bool {
        self.kind() == BridgeErrorKind::NotAuthenticated
    }

    /// Converts to the payload shape handed to the UI layer.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            details: self.details().map(str::to_string),
        }
    }
}

/// `{kind, message, details?}` as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: BridgeErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<BridgeError> for ErrorPayload {
    fn from(err: BridgeError) -> Self {
        err.to_payload()
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Returns the trimmed, lossy-decoded tail of a captured stream, or `None`
/// when nothing but whitespace was captured.
pub(crate) fn diagnostic_tail(bytes: &[u8]) -> Option<String> {
    let start = bytes.len().saturating_sub(DIAGNOSTIC_TAIL_BYTES);
    let text = String::from_utf8_lossy(&bytes[start..]);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
