//! Process Launcher
//!
//! Spawns one OS process per call, drains both output streams, enforces a hard
//! wall-clock bound and honours cancellation. The launcher has no protocol
//! knowledge: stdout is handed line by line to the caller and also collected
//! so the caller can decode it after exit.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Time allowed for a killed process to be reaped and its pipes to close.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

const STDERR_CHUNK: usize = 8 * 1024;

// =============================================================================
// Cancellation
// =============================================================================

/// Caller side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Requests termination of the associated invocation.
    ///
    /// Returns `false` if the invocation has already finished.
    pub fn cancel(mut self) -> bool {
        if let Some(tx) = self.cancel_tx.take() {
            tx.send(()).is_ok()
        } else {
            false
        }
    }
}

/// Launcher side of a cancellation pair.
#[derive(Debug)]
pub struct CancelSignal {
    cancel_rx: oneshot::Receiver<()>,
}

impl CancelSignal {
    /// Resolves only when [`CancelHandle::cancel`] was called. A dropped
    /// handle never fires.
    async fn cancelled(self) {
        if self.cancel_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        CancelHandle {
            cancel_tx: Some(cancel_tx),
        },
        CancelSignal { cancel_rx },
    )
}

// =============================================================================
// Request / Outcome
// =============================================================================

/// One process to run.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub program: &'a Path,
    pub args: &'a [OsString],
    pub timeout: Duration,
}

/// Why a process never started.
#[derive(Error, Debug)]
pub enum LaunchFailure {
    #[error("executable path must be absolute: {0}")]
    NotAbsolute(PathBuf),

    #[error("executable not found: {0}")]
    NotFound(PathBuf),

    #[error("file is not executable: {0}")]
    NotExecutable(PathBuf),

    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LaunchFailure {
    pub fn path(&self) -> &Path {
        match self {
            Self::NotAbsolute(path) | Self::NotFound(path) | Self::NotExecutable(path) => path,
            Self::Spawn { path, .. } => path,
        }
    }
}

/// How a launched (or not launched) process ended.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// The process exited; output is whatever was read before both streams
    /// closed or the kill grace ran out.
    Completed {
        exit_code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// The executable could not be started.
    LaunchFailed(LaunchFailure),
    /// The bound elapsed; the process was killed. Output collected so far is kept.
    TimedOut {
        limit: Duration,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// The caller cancelled; the process was killed.
    Cancelled { stdout: Vec<u8>, stderr: Vec<u8> },
    /// Waiting on the child failed after it had been spawned.
    Faulted {
        error: io::Error,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

// =============================================================================
// Launcher
// =============================================================================

/// Stateless process launcher; clones share nothing mutable.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    kill_grace: Duration,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_GRACE)
    }
}

impl ProcessLauncher {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Runs `request`, calling `on_stdout_line` for every complete stdout line
    /// (without its line terminator) as it arrives.
    pub async fn launch<F>(
        &self,
        request: LaunchRequest<'_>,
        cancel: Option<CancelSignal>,
        mut on_stdout_line: F,
    ) -> LaunchOutcome
    where
        F: FnMut(&[u8]),
    {
        if let Err(failure) = verify_executable(request.program) {
            tracing::debug!("Refusing to launch: {}", failure);
            return LaunchOutcome::LaunchFailed(failure);
        }

        let mut cmd = Command::new(request.program);
        cmd.args(request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_tokio_command(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                return LaunchOutcome::LaunchFailed(LaunchFailure::Spawn {
                    path: request.program.to_path_buf(),
                    source,
                });
            }
        };

        let started = Instant::now();
        tracing::debug!(
            "Spawned {} (PID: {:?})",
            request.program.display(),
            child.id()
        );

        let mut pipes = Pipes::new(child.stdout.take(), child.stderr.take());

        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);
        let cancelled = async move {
            match cancel {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(cancelled);

        let exit_code = loop {
            tokio::select! {
                _ = pipes.pump(&mut on_stdout_line), if !pipes.is_drained() => {}
                status = child.wait() => {
                    match status {
                        Ok(status) => break status.code(),
                        Err(error) => {
                            tracing::warn!("Failed to wait on CLI process: {}", error);
                            self.terminate(&mut child).await;
                            let (stdout, stderr) = pipes.into_buffers();
                            return LaunchOutcome::Faulted { error, stdout, stderr };
                        }
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        "CLI process exceeded {:?}; terminating (PID: {:?})",
                        request.timeout,
                        child.id()
                    );
                    self.terminate(&mut child).await;
                    self.drain_with_grace(&mut pipes, &mut on_stdout_line).await;
                    let (stdout, stderr) = pipes.into_buffers();
                    return LaunchOutcome::TimedOut {
                        limit: request.timeout,
                        stdout,
                        stderr,
                    };
                }
                _ = &mut cancelled => {
                    tracing::info!("CLI invocation cancelled; terminating (PID: {:?})", child.id());
                    self.terminate(&mut child).await;
                    self.drain_with_grace(&mut pipes, &mut on_stdout_line).await;
                    let (stdout, stderr) = pipes.into_buffers();
                    return LaunchOutcome::Cancelled { stdout, stderr };
                }
            }
        };

        // The bound applies to the CLI itself; descendants still holding the
        // pipes only get the grace period.
        self.drain_with_grace(&mut pipes, &mut on_stdout_line).await;

        tracing::debug!(
            "CLI process exited with {:?} after {}ms",
            exit_code,
            started.elapsed().as_millis()
        );
        let (stdout, stderr) = pipes.into_buffers();
        LaunchOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        }
    }

    /// Kills the child and waits (bounded) for it to be reaped.
    async fn terminate(&self, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            // Already exited processes report InvalidInput here.
            tracing::debug!("start_kill failed: {}", e);
        }
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("Reaped CLI process: {}", status),
            Ok(Err(e)) => tracing::warn!("Failed to reap CLI process: {}", e),
            Err(_) => tracing::warn!(
                "CLI process not reaped within {:?}; kill_on_drop will finish it",
                self.kill_grace
            ),
        }
    }

    /// Collects output still buffered in the pipes once the CLI is gone,
    /// without waiting on descendants that may hold them open.
    async fn drain_with_grace<F>(&self, pipes: &mut Pipes, on_stdout_line: &mut F)
    where
        F: FnMut(&[u8]),
    {
        let drained = tokio::time::timeout(self.kill_grace, async {
            while !pipes.is_drained() {
                pipes.pump(on_stdout_line).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("Output pipes still open after {:?}; abandoning", self.kill_grace);
        }
    }
}

/// Checks that `path` is an absolute path to an executable regular file.
pub fn verify_executable(path: &Path) -> Result<(), LaunchFailure> {
    if !path.is_absolute() {
        return Err(LaunchFailure::NotAbsolute(path.to_path_buf()));
    }

    let metadata =
        std::fs::metadata(path).map_err(|_| LaunchFailure::NotFound(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(LaunchFailure::NotExecutable(path.to_path_buf()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(LaunchFailure::NotExecutable(path.to_path_buf()));
        }
    }

    Ok(())
}

/// Suppresses the console window Windows opens for console binaries spawned
/// from a GUI process.
fn configure_tokio_command(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

// =============================================================================
// Pipe draining
// =============================================================================

/// Both output streams of one child plus everything read from them so far.
struct Pipes {
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<ChildStderr>,
    stdout_buf: Vec<u8>,
    stderr_buf: Vec<u8>,
    line: Vec<u8>,
}

impl Pipes {
    fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Self {
        Self {
            stdout: stdout.map(BufReader::new),
            stderr,
            stdout_buf: Vec::new(),
            stderr_buf: Vec::new(),
            line: Vec::new(),
        }
    }

    fn is_drained(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    /// Performs one read on whichever stream is ready first.
    ///
    /// Both reads are cancel safe: `read_until` keeps partial data in
    /// `self.line`, and a cancelled `read` consumes nothing.
    async fn pump<F>(&mut self, on_stdout_line: &mut F)
    where
        F: FnMut(&[u8]),
    {
        let Self {
            stdout,
            stderr,
            stdout_buf,
            stderr_buf,
            line,
        } = self;
        let mut chunk = [0u8; STDERR_CHUNK];

        tokio::select! {
            read = read_stdout_line(stdout, line) => {
                match read {
                    Ok(0) => {
                        *stdout = None;
                    }
                    Ok(_) => {
                        let complete = line.last() == Some(&b'\n');
                        stdout_buf.extend_from_slice(line);
                        on_stdout_line(trim_line_end(line));
                        line.clear();
                        if !complete {
                            // read_until only stops short of the delimiter at EOF.
                            *stdout = None;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read CLI stdout: {}", e);
                        *stdout = None;
                    }
                }
            }
            read = read_stderr_chunk(stderr, &mut chunk) => {
                match read {
                    Ok(0) => *stderr = None,
                    Ok(n) => stderr_buf.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        tracing::warn!("Failed to read CLI stderr: {}", e);
                        *stderr = None;
                    }
                }
            }
        }
    }

    fn into_buffers(self) -> (Vec<u8>, Vec<u8>) {
        let mut stdout = self.stdout_buf;
        stdout.extend_from_slice(&self.line);
        (stdout, self.stderr_buf)
    }
}

async fn read_stdout_line(
    reader: &mut Option<BufReader<ChildStdout>>,
    line: &mut Vec<u8>,
) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read_until(b'\n', line).await,
        None => std::future::pending().await,
    }
}

async fn read_stderr_chunk(pipe: &mut Option<ChildStderr>, chunk: &mut [u8]) -> io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.read(chunk).await,
        None => std::future::pending().await,
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
