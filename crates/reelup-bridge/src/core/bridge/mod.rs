//! CLI Process Bridge
//!
//! Runs the external Reelup agent CLI as a subprocess and turns what it
//! prints into typed results:
//! - Process supervision with a hard wall-clock bound and cancellation
//! - Newline-delimited JSON decoding that tolerates interleaved noise
//! - Upload progress relayed to an observer while the process runs
//! - A closed error taxonomy the UI can branch on
//!
//! The CLI is always invoked in machine mode (`--machine <command> ...`); the
//! last JSON object it prints is the authoritative result of the call.

mod classify;
mod decoder;
mod dispatcher;
mod error;
mod executable;
mod launcher;
mod operation;
mod progress;
mod responses;

pub use classify::{classify, Evidence, Verdict};
pub use decoder::{decode, DecodeError, Decoded, LineDecoder, RawEvent, TerminalResult};
pub use dispatcher::{BridgeConfig, CommandDispatcher, DEFAULT_TIMEOUT, DEFAULT_UPLOAD_TIMEOUT};
pub use error::{BridgeError, BridgeErrorKind, BridgeResult, ErrorPayload, DIAGNOSTIC_TAIL_BYTES};
pub use executable::{
    resolve_executable, resolve_with, ExecutableSource, ResolveInputs, ResolvedExecutable,
    CLI_BINARY_NAME, CLI_ENV_VAR,
};
pub use launcher::{
    cancel_pair, verify_executable, CancelHandle, CancelSignal, LaunchFailure, LaunchOutcome,
    LaunchRequest, ProcessLauncher, DEFAULT_KILL_GRACE,
};
pub use operation::{Operation, OperationKind, OutputMode, TimeoutClass, MACHINE_FLAG};
pub use progress::{deliver, ProgressEvent, ProgressObserver, ProgressPhase, ProgressRelay};
pub use responses::{
    decode_success, AssetSummary, DeleteResponse, ListResponse, LoginResponse, LogoutResponse,
    PlaybackId, StatusResponse, UploadResponse,
};

#[cfg(test)]
mod tests_destructive;
