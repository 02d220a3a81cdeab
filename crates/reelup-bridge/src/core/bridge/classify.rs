//! Error Classifier
//!
//! A pure, total mapping from what happened to one invocation onto either the
//! terminal success payload or exactly one [`BridgeError`]. Rules are applied
//! in order; `unknown` is the fallback and always carries raw diagnostics.

use std::io;
use std::time::Duration;

use super::decoder::{DecodeError, TerminalResult};
use super::error::{diagnostic_tail, BridgeError};
use super::launcher::LaunchFailure;

const NOT_AUTHENTICATED_FALLBACK: &str = "Not authenticated. Please log in again.";

/// Everything the classifier may look at for one finished invocation.
#[derive(Debug)]
pub enum Evidence<'a> {
    LaunchFailed(&'a LaunchFailure),
    TimedOut {
        limit: Duration,
        stderr: &'a [u8],
    },
    Cancelled,
    Faulted {
        error: &'a io::Error,
        stdout: &'a [u8],
        stderr: &'a [u8],
    },
    Exited {
        exit_code: Option<i32>,
        terminal: Result<TerminalResult, DecodeError>,
        /// First event that failed phase validation, if any.
        event_violation: Option<DecodeError>,
        stdout: &'a [u8],
        stderr: &'a [u8],
    },
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Success(TerminalResult),
    Failure(BridgeError),
}

impl Verdict {
    pub fn into_result(self) -> Result<TerminalResult, BridgeError> {
        match self {
            Self::Success(terminal) => Ok(terminal),
            Self::Failure(err) => Err(err),
        }
    }
}

/// Maps `evidence` to exactly one verdict.
pub fn classify(evidence: Evidence<'_>) -> Verdict {
    match evidence {
        Evidence::LaunchFailed(failure) => Verdict::Failure(BridgeError::ProcessNotFound {
            path: failure.path().display().to_string(),
            reason: failure.to_string(),
        }),
        Evidence::TimedOut { limit, stderr } => Verdict::Failure(BridgeError::Timeout {
            limit,
            diagnostic: diagnostic_tail(stderr),
        }),
        Evidence::Cancelled => Verdict::Failure(BridgeError::Cancelled),
        Evidence::Faulted {
            error,
            stdout,
            stderr,
        } => Verdict::Failure(BridgeError::Unknown {
            message: format!("Lost track of the CLI process: {}", error),
            diagnostic: raw_diagnostic(stdout, stderr),
        }),
        Evidence::Exited {
            exit_code,
            terminal,
            event_violation,
            stdout,
            stderr,
        } => classify_exit(exit_code, terminal, event_violation, stdout, stderr),
    }
}

fn classify_exit(
    exit_code: Option<i32>,
    terminal: Result<TerminalResult, DecodeError>,
    event_violation: Option<DecodeError>,
    stdout: &[u8],
    stderr: &[u8],
) -> Verdict {
    // Re-login is triggered uniformly, whatever the exit code.
    if let Ok(result) = &terminal {
        if result.is_not_authenticated() {
            return Verdict::Failure(BridgeError::NotAuthenticated {
                message: result
                    .message()
                    .unwrap_or(NOT_AUTHENTICATED_FALLBACK)
                    .to_string(),
            });
        }
    }

    match exit_code {
        Some(0) => {
            if let Some(violation) = event_violation {
                return Verdict::Failure(malformed(violation, stdout));
            }
            match terminal {
                Ok(result) if result.is_success() => Verdict::Success(result),
                Ok(result) => Verdict::Failure(BridgeError::Unknown {
                    message: result
                        .message()
                        .unwrap_or("CLI reported failure with a zero exit code")
                        .to_string(),
                    diagnostic: raw_diagnostic(stdout, stderr),
                }),
                Err(err) => Verdict::Failure(malformed(err, stdout)),
            }
        }
        Some(code) => {
            let structured = terminal
                .ok()
                .filter(|result| !result.is_success())
                .and_then(|result| result.message().map(str::to_string));
            let message = structured
                .or_else(|| stderr_message(stderr))
                .unwrap_or_else(|| format!("CLI exited with code {}", code));
            Verdict::Failure(BridgeError::NonZeroExit {
                exit_code: Some(code),
                message,
                diagnostic: diagnostic_tail(stderr),
            })
        }
        None => Verdict::Failure(BridgeError::Unknown {
            message: "CLI terminated by a signal".to_string(),
            diagnostic: raw_diagnostic(stdout, stderr),
        }),
    }
}

fn malformed(err: DecodeError, stdout: &[u8]) -> BridgeError {
    tracing::warn!("CLI protocol violation: {}", err);
    BridgeError::MalformedOutput {
        reason: err.to_string(),
        diagnostic: diagnostic_tail(stdout),
    }
}

/// Last non-empty stderr line; CLIs print the actual error last.
fn stderr_message(stderr: &[u8]) -> Option<String> {
    let text = diagnostic_tail(stderr)?;
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Never-empty diagnostic text for `unknown`.
fn raw_diagnostic(stdout: &[u8], stderr: &[u8]) -> String {
    match (diagnostic_tail(stderr), diagnostic_tail(stdout)) {
        (Some(err), Some(out)) => format!("stderr: {}\nstdout: {}", err, out),
        (Some(err), None) => format!("stderr: {}", err),
        (None, Some(out)) => format!("stdout: {}", out),
        (None, None) => "<no output captured>".to_string(),
    }
}
