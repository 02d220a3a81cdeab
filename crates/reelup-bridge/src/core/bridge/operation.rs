//! Operations understood by the external CLI.
//!
//! Each [`Operation`] maps deterministically onto an argument vector of the
//! form `--machine <command> [args...]`, and declares whether its output is a
//! single terminal object or a stream of progress events plus a terminal.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Switches the external tool into line-oriented JSON output.
pub const MACHINE_FLAG: &str = "--machine";

/// Placeholder used wherever a secret would otherwise be logged.
const REDACTED: &str = "<redacted>";

/// Logical request types, including the local-only file selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Status,
    Login,
    Logout,
    List,
    Delete,
    SelectFile,
    Upload,
}

/// How an operation's stdout is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One terminal JSON object
    Simple,
    /// Progress events followed by one terminal JSON object
    Streaming,
}

/// Which configured timeout bounds an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Default,
    Extended,
}

impl OperationKind {
    /// Subcommand name passed after [`MACHINE_FLAG`].
    pub fn command_name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::List => "list",
            Self::Delete => "delete",
            Self::SelectFile => "select-file",
            Self::Upload => "upload",
        }
    }

    pub fn output_mode(self) -> OutputMode {
        match self {
            Self::Upload => OutputMode::Streaming,
            _ => OutputMode::Simple,
        }
    }

    pub fn timeout_class(self) -> TimeoutClass {
        match self {
            Self::Upload => TimeoutClass::Extended,
            _ => TimeoutClass::Default,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

/// A fully parameterized request for the external CLI.
#[derive(Clone, PartialEq, Eq)]
pub enum Operation {
    Status,
    Login {
        token_id: String,
        token_secret: String,
    },
    Logout,
    List,
    Delete {
        asset_id: String,
    },
    Upload {
        file_path: PathBuf,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Status => OperationKind::Status,
            Self::Login { .. } => OperationKind::Login,
            Self::Logout => OperationKind::Logout,
            Self::List => OperationKind::List,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Upload { .. } => OperationKind::Upload,
        }
    }

    /// Builds the argument vector for this operation.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![MACHINE_FLAG.into(), self.kind().command_name().into()];
        match self {
            Self::Status | Self::Logout | Self::List => {}
            Self::Login {
                token_id,
                token_secret,
            } => {
                args.extend([
                    OsString::from("--token-id"),
                    OsString::from(token_id),
                    OsString::from("--token-secret"),
                    OsString::from(token_secret),
                ]);
            }
            Self::Delete { asset_id } => args.push(asset_id.into()),
            Self::Upload { file_path } => args.push(file_path.clone().into_os_string()),
        }
        args
    }

    /// Argument vector safe to write to logs.
    pub fn display_args(&self) -> Vec<String> {
        let mut display: Vec<String> = self
            .to_args()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        if let Self::Login { .. } = self {
            if let Some(pos) = display.iter().position(|arg| arg == "--token-secret") {
                if let Some(secret) = display.get_mut(pos + 1) {
                    *secret = REDACTED.to_string();
                }
            }
        }
        display
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => f.write_str("Status"),
            Self::Login { token_id, .. } => f
                .debug_struct("Login")
                .field("token_id", token_id)
                .field("token_secret", &REDACTED)
                .finish(),
            Self::Logout => f.write_str("Logout"),
            Self::List => f.write_str("List"),
            Self::Delete { asset_id } => f.debug_struct("Delete").field("asset_id", asset_id).finish(),
            Self::Upload { file_path } => f
                .debug_struct("Upload")
                .field("file_path", file_path)
                .finish(),
        }
    }
}
