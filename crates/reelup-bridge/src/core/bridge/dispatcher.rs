//! Command Dispatcher
//!
//! Turns an [`Operation`] into one supervised subprocess run and one result.
//! Every call owns a `PendingInvocation`; nothing is shared between calls
//! except the read-only [`BridgeConfig`], so any number of calls may run
//! concurrently.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::classify::{classify, Evidence, Verdict};
use super::decoder::{DecodeError, LineDecoder, RawEvent, TerminalResult};
use super::error::BridgeResult;
use super::launcher::{
    cancel_pair, CancelHandle, CancelSignal, LaunchOutcome, LaunchRequest, ProcessLauncher,
    DEFAULT_KILL_GRACE,
};
use super::operation::{Operation, OperationKind, OutputMode, TimeoutClass};
use super::progress::{ProgressEvent, ProgressObserver, ProgressPhase, ProgressRelay};
use super::responses::{
    decode_delete, decode_list, decode_success, DeleteResponse, ListResponse, LoginResponse,
    LogoutResponse, StatusResponse, UploadResponse,
};

/// Default bound for simple operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for uploads.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

// =============================================================================
// Configuration
// =============================================================================

/// Read-only configuration shared by every call.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Absolute path of the external CLI.
    pub executable: PathBuf,
    pub default_timeout: Duration,
    pub upload_timeout: Duration,
    /// How long a killed process gets to be reaped.
    pub kill_grace: Duration,
}

impl BridgeConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            default_timeout: DEFAULT_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Wall-clock bound for one operation kind.
    pub fn timeout_for(&self, kind: OperationKind) -> Duration {
        match kind.timeout_class() {
            TimeoutClass::Default => self.default_timeout,
            TimeoutClass::Extended => self.upload_timeout,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Entry point for all bridge operations. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    config: Arc<BridgeConfig>,
    launcher: ProcessLauncher,
}

impl CommandDispatcher {
    pub fn new(config: BridgeConfig) -> Self {
        let launcher = ProcessLauncher::new(config.kill_grace);
        Self {
            config: Arc::new(config),
            launcher,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Runs `operation` and returns its successful terminal result.
    ///
    /// For streaming operations every decoded event reaches `observer`, in
    /// order, before this returns. Simple operations never call it.
    pub async fn execute(
        &self,
        operation: &Operation,
        observer: Option<&mut dyn ProgressObserver>,
    ) -> BridgeResult<TerminalResult> {
        self.execute_with_cancel(operation, observer, None).await
    }

    /// [`execute`](Self::execute) that stops early, with
    /// `BridgeError::Cancelled`, once the matching [`CancelHandle`] fires.
    pub async fn execute_cancellable(
        &self,
        operation: &Operation,
        observer: Option<&mut dyn ProgressObserver>,
        cancel: CancelSignal,
    ) -> BridgeResult<TerminalResult> {
        self.execute_with_cancel(operation, observer, Some(cancel))
            .await
    }

    async fn execute_with_cancel(
        &self,
        operation: &Operation,
        observer: Option<&mut dyn ProgressObserver>,
        cancel: Option<CancelSignal>,
    ) -> BridgeResult<TerminalResult> {
        let kind = operation.kind();
        let timeout = self.config.timeout_for(kind);
        let args = operation.to_args();
        let mut pending = PendingInvocation::new(kind, observer);

        tracing::debug!(
            "[{}] Dispatching {} with args {:?} (timeout {:?})",
            pending.id,
            kind.command_name(),
            operation.display_args(),
            timeout
        );

        let outcome = self
            .launcher
            .launch(
                LaunchRequest {
                    program: &self.config.executable,
                    args: &args,
                    timeout,
                },
                cancel,
                |line| pending.on_stdout_line(line),
            )
            .await;

        pending.resolve(outcome)
    }

    pub async fn status(&self) -> BridgeResult<StatusResponse> {
        let terminal = self.execute(&Operation::Status, None).await?;
        decode_success(OperationKind::Status, terminal)
    }

    pub async fn login(
        &self,
        token_id: impl Into<String>,
        token_secret: impl Into<String>,
    ) -> BridgeResult<LoginResponse> {
        let operation = Operation::Login {
            token_id: token_id.into(),
            token_secret: token_secret.into(),
        };
        let terminal = self.execute(&operation, None).await?;
        decode_success(OperationKind::Login, terminal)
    }

    pub async fn logout(&self) -> BridgeResult<LogoutResponse> {
        let terminal = self.execute(&Operation::Logout, None).await?;
        decode_success(OperationKind::Logout, terminal)
    }

    pub async fn list(&self) -> BridgeResult<ListResponse> {
        let terminal = self.execute(&Operation::List, None).await?;
        decode_list(terminal)
    }

    pub async fn delete(&self, asset_id: impl Into<String>) -> BridgeResult<DeleteResponse> {
        let asset_id = asset_id.into();
        let operation = Operation::Delete {
            asset_id: asset_id.clone(),
        };
        let terminal = self.execute(&operation, None).await?;
        decode_delete(terminal, &asset_id)
    }

    pub async fn upload(
        &self,
        file_path: impl Into<PathBuf>,
        observer: Option<&mut dyn ProgressObserver>,
    ) -> BridgeResult<UploadResponse> {
        self.run_upload(file_path.into(), observer, None).await
    }

    /// Upload that stops early, with `BridgeError::Cancelled`, once the
    /// matching [`CancelHandle`] fires.
    pub async fn upload_with_cancel(
        &self,
        file_path: impl Into<PathBuf>,
        observer: Option<&mut dyn ProgressObserver>,
        cancel: CancelSignal,
    ) -> BridgeResult<UploadResponse> {
        self.run_upload(file_path.into(), observer, Some(cancel))
            .await
    }

    /// Returns a cancel handle together with the upload future.
    pub fn upload_cancellable<'a>(
        &'a self,
        file_path: PathBuf,
        observer: Option<&'a mut dyn ProgressObserver>,
    ) -> (
        CancelHandle,
        impl Future<Output = BridgeResult<UploadResponse>> + Send + 'a,
    ) {
        let (handle, signal) = cancel_pair();
        let run = async move { self.run_upload(file_path, observer, Some(signal)).await };
        (handle, run)
    }

    async fn run_upload(
        &self,
        file_path: PathBuf,
        observer: Option<&mut dyn ProgressObserver>,
        cancel: Option<CancelSignal>,
    ) -> BridgeResult<UploadResponse> {
        let operation = Operation::Upload { file_path };
        let terminal = self
            .execute_with_cancel(&operation, observer, cancel)
            .await?;
        decode_success(OperationKind::Upload, terminal)
    }
}

// =============================================================================
// Per-call state
// =============================================================================

/// State owned by exactly one in-flight call.
struct PendingInvocation<'o> {
    id: String,
    kind: OperationKind,
    started_at: Instant,
    decoder: LineDecoder,
    events: EventStream<'o>,
}

/// Validates displaced objects as events and relays them.
struct EventStream<'o> {
    streaming: bool,
    relay: ProgressRelay<'o>,
    last_phase: Option<ProgressPhase>,
    /// First protocol violation; relaying stops once set.
    violation: Option<DecodeError>,
}

impl<'o> EventStream<'o> {
    fn accept(&mut self, raw: &RawEvent) {
        if !self.streaming || self.violation.is_some() {
            return;
        }
        match ProgressEvent::from_raw(raw) {
            Ok(event) => self.deliver(&event),
            Err(err) => {
                tracing::warn!("Rejecting progress event: {}", err);
                self.violation = Some(err);
            }
        }
    }

    /// Relays in decoded order; a phase moving backwards is only logged.
    fn deliver(&mut self, event: &ProgressEvent) {
        if let Some(last) = self.last_phase {
            if event.phase.ordinal() < last.ordinal() {
                tracing::debug!(
                    "Upload phase went back from {} to {}",
                    last.as_str(),
                    event.phase.as_str()
                );
            }
        }
        self.last_phase = Some(event.phase);
        self.relay.deliver(event);
    }

    /// Relays the object held back by the lookahead when the run ended
    /// without a terminal result.
    fn flush(&mut self, held: Option<RawEvent>) {
        if !self.streaming || self.violation.is_some() {
            return;
        }
        if let Some(raw) = held {
            match ProgressEvent::from_raw(&raw) {
                Ok(event) => self.deliver(&event),
                Err(err) => tracing::debug!("Dropping trailing object: {}", err),
            }
        }
    }
}

impl<'o> PendingInvocation<'o> {
    fn new(kind: OperationKind, observer: Option<&'o mut dyn ProgressObserver>) -> Self {
        let decoder = LineDecoder::new(kind.output_mode());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            started_at: Instant::now(),
            events: EventStream {
                streaming: decoder.mode() == OutputMode::Streaming,
                relay: ProgressRelay::new(observer),
                last_phase: None,
                violation: None,
            },
            decoder,
        }
    }

    fn on_stdout_line(&mut self, line: &[u8]) {
        if let Some(raw) = self.decoder.push_line(line) {
            self.events.accept(&raw);
        }
    }

    /// Consumes the invocation, classifying how the run ended.
    fn resolve(self, outcome: LaunchOutcome) -> BridgeResult<TerminalResult> {
        let Self {
            id,
            kind,
            started_at,
            decoder,
            mut events,
        } = self;
        let skipped = decoder.lines_skipped();
        let objects = decoder.objects_seen();

        let verdict = match outcome {
            LaunchOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                let terminal = decoder.finish();
                classify(Evidence::Exited {
                    exit_code,
                    terminal,
                    event_violation: events.violation.take(),
                    stdout: &stdout,
                    stderr: &stderr,
                })
            }
            LaunchOutcome::LaunchFailed(failure) => classify(Evidence::LaunchFailed(&failure)),
            LaunchOutcome::TimedOut { limit, stderr, .. } => {
                events.flush(decoder.abandon());
                classify(Evidence::TimedOut {
                    limit,
                    stderr: &stderr,
                })
            }
            LaunchOutcome::Cancelled { .. } => {
                events.flush(decoder.abandon());
                classify(Evidence::Cancelled)
            }
            LaunchOutcome::Faulted {
                error,
                stdout,
                stderr,
            } => {
                events.flush(decoder.abandon());
                classify(Evidence::Faulted {
                    error: &error,
                    stdout: &stdout,
                    stderr: &stderr,
                })
            }
        };

        let elapsed_ms = started_at.elapsed().as_millis();
        match &verdict {
            Verdict::Success(_) => tracing::info!(
                "[{}] {} succeeded in {}ms ({} objects, {} events, {} noise lines)",
                id,
                kind.command_name(),
                elapsed_ms,
                objects,
                events.relay.delivered(),
                skipped
            ),
            Verdict::Failure(err) => tracing::info!(
                "[{}] {} failed in {}ms: {} ({})",
                id,
                kind.command_name(),
                elapsed_ms,
                err,
                err.kind()
            ),
        }

        verdict.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::error::{BridgeError, BridgeErrorKind};
    #[cfg(unix)]
    use crate::core::bridge::test_support::{fake_cli, process_is_alive};
    use serial_test::serial;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn dispatcher_for(dir: &TempDir, body: &str) -> CommandDispatcher {
        let program = fake_cli(dir.path(), "reelup-agent", body);
        CommandDispatcher::new(BridgeConfig::new(program))
    }

    #[test]
    fn test_timeout_for_kind() {
        let config = BridgeConfig::new("/opt/reelup/agent")
            .with_default_timeout(Duration::from_secs(5))
            .with_upload_timeout(Duration::from_secs(500));
        assert_eq!(
            config.timeout_for(OperationKind::Status),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.timeout_for(OperationKind::Delete),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.timeout_for(OperationKind::Upload),
            Duration::from_secs(500)
        );
    }

    #[test]
    fn test_out_of_order_phases_are_relayed_as_decoded() {
        let mut seen = Vec::new();
        let mut observer = |event: &ProgressEvent| seen.push(event.phase);
        let mut events = EventStream {
            streaming: true,
            relay: ProgressRelay::new(Some(&mut observer)),
            last_phase: None,
            violation: None,
        };
        events.deliver(&ProgressEvent::new(ProgressPhase::FileUploaded));
        events.deliver(&ProgressEvent::new(ProgressPhase::UploadingChunk));
        assert_eq!(events.last_phase, Some(ProgressPhase::UploadingChunk));
        drop(events);
        assert_eq!(
            seen,
            [ProgressPhase::FileUploaded, ProgressPhase::UploadingChunk]
        );
    }

    #[tokio::test]
    async fn test_missing_executable_is_process_not_found() {
        let dir = TempDir::new().unwrap();
        let dispatcher = CommandDispatcher::new(BridgeConfig::new(dir.path().join("absent")));

        let err = dispatcher.status().await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::ProcessNotFound);

        let mut calls = 0;
        let mut observer = |_: &ProgressEvent| calls += 1;
        let err = dispatcher
            .upload("/tmp/video.mp4", Some(&mut observer))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::ProcessNotFound);
        assert_eq!(calls, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_status_success() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            r#"echo '{"success":true,"isAuthenticated":true}'"#,
        );
        let status = dispatcher.status().await.unwrap();
        assert!(status.is_authenticated);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_login_structured_failure() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            "echo '{\"success\":false,\"message\":\"invalid token\"}'\nexit 1",
        );
        let err = dispatcher.login("id", "secret").await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::NonZeroExit);
        assert_eq!(err.to_string(), "invalid token");
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_arguments_reach_the_cli() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            r#"if [ "$1" = "--machine" ] && [ "$2" = "delete" ] && [ "$3" = "asset-42" ]; then
  echo '{"success":true}'
else
  echo "unexpected: $*" >&2
  exit 9
fi"#,
        );
        let deleted = dispatcher.delete("asset-42").await.unwrap();
        assert_eq!(deleted.asset_id, "asset-42");
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_upload_relays_events_in_order() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            r#"echo '{"phase":"validating_file"}'
echo '{"phase":"uploading_chunk","currentChunk":1,"totalChunks":2}'
echo '{"success":true,"assetId":"abc"}'"#,
        );

        let mut seen = Vec::new();
        let mut observer = |event: &ProgressEvent| seen.push(event.clone());
        let uploaded = dispatcher
            .upload("/tmp/clip.mp4", Some(&mut observer))
            .await
            .unwrap();

        assert_eq!(uploaded.asset_id, "abc");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].phase, ProgressPhase::ValidatingFile);
        assert_eq!(seen[1].phase, ProgressPhase::UploadingChunk);
        assert_eq!(seen[1].current_chunk, Some(1));
        assert_eq!(seen[1].total_chunks, Some(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_noise_lines_are_ignored() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            r#"echo 'Starting upload...'
echo '{"phase":"validating_file"}'
echo ''
echo 'debug: chunk size 5MB'
echo '{"phase":"file_uploaded"}'
echo '{"success":true,"assetId":"abc"}'
echo 'bye'"#,
        );

        let mut phases = Vec::new();
        let mut observer = |event: &ProgressEvent| phases.push(event.phase);
        let uploaded = dispatcher
            .upload("/tmp/clip.mp4", Some(&mut observer))
            .await
            .unwrap();
        assert_eq!(uploaded.asset_id, "abc");
        assert_eq!(
            phases,
            [ProgressPhase::ValidatingFile, ProgressPhase::FileUploaded]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_simple_operations_never_call_observer() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            r#"echo '{"phase":"validating_file"}'
echo '{"success":true,"isAuthenticated":false}'"#,
        );
        let mut calls = 0;
        let mut observer = |_: &ProgressEvent| calls += 1;
        let terminal = dispatcher
            .execute(&Operation::Status, Some(&mut observer))
            .await
            .unwrap();
        assert!(terminal.is_success());
        assert_eq!(calls, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_non_zero_exit_with_stderr_only() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(&dir, "echo 'Error: network unreachable' >&2\nexit 2");
        let err = dispatcher.list().await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::NonZeroExit);
        assert_eq!(err.to_string(), "Error: network unreachable");
        assert_eq!(err.details(), Some("Error: network unreachable"));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_zero_exit_with_garbage_is_malformed() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(&dir, "echo 'totally not json'");
        let err = dispatcher.status().await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::MalformedOutput);
        assert_eq!(err.details(), Some("totally not json"));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_success_with_wrong_shape_is_malformed() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(&dir, r#"echo '{"success":true}'"#);
        let err = dispatcher.status().await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::MalformedOutput);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_unknown_phase_is_malformed() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            r#"echo '{"phase":"validating_file"}'
echo '{"phase":"teleporting"}'
echo '{"phase":"file_uploaded"}'
echo '{"success":true,"assetId":"abc"}'"#,
        );
        let mut phases = Vec::new();
        let mut observer = |event: &ProgressEvent| phases.push(event.phase);
        let err = dispatcher
            .upload("/tmp/clip.mp4", Some(&mut observer))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::MalformedOutput);
        assert!(err.to_string().contains("teleporting"));
        assert_eq!(phases, [ProgressPhase::ValidatingFile]);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_progress_relayed_before_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            r#"echo '{"phase":"validating_file"}'
echo '{"phase":"uploading_chunk","currentChunk":1,"totalChunks":4}'
echo '{"success":false,"message":"connection reset"}'
exit 1"#,
        );
        let mut phases = Vec::new();
        let mut observer = |event: &ProgressEvent| phases.push(event.phase);
        let err = dispatcher
            .upload("/tmp/clip.mp4", Some(&mut observer))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::NonZeroExit);
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(
            phases,
            [ProgressPhase::ValidatingFile, ProgressPhase::UploadingChunk]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_not_authenticated_failure() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            "echo '{\"success\":false,\"code\":\"not_authenticated\",\"message\":\"Not logged in\"}'\nexit 1",
        );
        let err = dispatcher.list().await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::NotAuthenticated);
        assert!(err.requires_login());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_hang_times_out_and_kills() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let program = fake_cli(
            dir.path(),
            "reelup-agent",
            &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
        );
        let dispatcher = CommandDispatcher::new(
            BridgeConfig::new(program).with_default_timeout(Duration::from_millis(300)),
        );

        let started = Instant::now();
        let err = dispatcher.status().await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!process_is_alive(pid.trim()));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_timeout_flushes_last_event() {
        let dir = TempDir::new().unwrap();
        let program = fake_cli(
            dir.path(),
            "reelup-agent",
            r#"echo '{"phase":"validating_file"}'
echo '{"phase":"uploading_file","bytesUploaded":10,"totalBytes":100}'
exec sleep 30"#,
        );
        let dispatcher = CommandDispatcher::new(
            BridgeConfig::new(program).with_upload_timeout(Duration::from_millis(500)),
        );

        let mut phases = Vec::new();
        let mut observer = |event: &ProgressEvent| phases.push(event.phase);
        let err = dispatcher
            .upload("/tmp/clip.mp4", Some(&mut observer))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::Timeout);
        assert_eq!(
            phases,
            [ProgressPhase::ValidatingFile, ProgressPhase::UploadingFile]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_cancel_simple_operation() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(&dir, "exec sleep 30");

        let (handle, signal) = cancel_pair();
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(handle.cancel());
        };
        let started = Instant::now();
        let (result, ()) = tokio::join!(
            dispatcher.execute_cancellable(&Operation::List, None, signal),
            cancel
        );

        assert_eq!(result.unwrap_err(), BridgeError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_cancel_upload() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(&dir, "echo '{\"phase\":\"validating_file\"}'\nexec sleep 30");

        let (handle, run) = dispatcher.upload_cancellable(PathBuf::from("/tmp/clip.mp4"), None);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(handle.cancel());
        };
        let started = Instant::now();
        let (result, ()) = tokio::join!(run, cancel);

        let err = result.unwrap_err();
        assert_eq!(err, BridgeError::Cancelled);
        assert_eq!(err.kind(), BridgeErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_repeated_calls_classify_identically() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            "echo '{\"success\":false,\"message\":\"Asset not found\"}'\nexit 1",
        );
        let first = dispatcher.delete("missing").await.unwrap_err();
        let second = dispatcher.delete("missing").await.unwrap_err();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_concurrent_calls_are_independent() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(
            &dir,
            r#"case "$2" in
  status) sleep 0.2; echo '{"success":true,"isAuthenticated":true}' ;;
  list) echo '{"success":true,"assets":[{"id":"a1"}]}' ;;
  *) echo '{"success":false,"message":"nope"}'; exit 1 ;;
esac"#,
        );

        let (status, list, logout) =
            tokio::join!(dispatcher.status(), dispatcher.list(), dispatcher.logout());
        assert!(status.unwrap().is_authenticated);
        assert_eq!(list.unwrap().assets[0].id, "a1");
        assert_eq!(logout.unwrap_err().to_string(), "nope");
    }
}
