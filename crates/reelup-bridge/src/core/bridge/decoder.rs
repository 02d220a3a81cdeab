//! Line Protocol Decoder
//!
//! The CLI writes newline-delimited JSON in machine mode: zero or more event
//! objects followed by one terminal object. Anything that is not a JSON object
//! (diagnostic prints, blank lines, partial writes) is skipped.
//!
//! [`LineDecoder`] works incrementally with a one-object lookahead so events
//! can be relayed while the process is still running: an object is only known
//! to be an event once another object follows it. The last object seen is the
//! terminal result.

use serde_json::{Map, Value};
use thiserror::Error;

use super::operation::OutputMode;

/// Untyped event object, before phase validation.
pub type RawEvent = Map<String, Value>;

/// Field every terminal object must carry.
pub const SUCCESS_FIELD: &str = "success";

/// Failure-code values that mean "credentials missing or rejected".
const NOT_AUTHENTICATED_CODES: &[&str] = &["not_authenticated", "unauthenticated", "not-authenticated"];

/// Message fragments the CLI uses when no session is available.
const NOT_AUTHENTICATED_MESSAGES: &[&str] = &["not authenticated", "not logged in"];

/// Protocol violations found while decoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("no JSON object found in CLI output")]
    NoJsonObject,

    #[error("terminal result has no boolean `success` field")]
    MissingSuccess,

    #[error("progress event has no `phase` discriminator: {event}")]
    MissingPhase { event: String },

    #[error("unknown progress phase `{phase}`")]
    UnknownPhase { phase: String },

    #[error("unexpected {operation} payload: {reason}")]
    InvalidPayload { operation: String, reason: String },
}

/// The authoritative final object of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalResult {
    success: bool,
    payload: Map<String, Value>,
}

impl TerminalResult {
    /// Validates the success discriminator of a terminal object.
    pub fn from_object(payload: Map<String, Value>) -> Result<Self, DecodeError> {
        let success = payload
            .get(SUCCESS_FIELD)
            .and_then(Value::as_bool)
            .ok_or(DecodeError::MissingSuccess)?;
        Ok(Self { success, payload })
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Human-readable failure (or status) message, if the CLI sent one.
    pub fn message(&self) -> Option<&str> {
        ["message", "error"]
            .iter()
            .filter_map(|key| self.payload.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|msg| !msg.is_empty())
    }

    /// Whether this is a failure caused by missing or rejected credentials.
    pub fn is_not_authenticated(&self) -> bool {
        if self.success {
            return false;
        }

        let code_matches = ["code", "error"].iter().any(|key| {
            self.payload
                .get(*key)
                .and_then(Value::as_str)
                .map(|code| {
                    NOT_AUTHENTICATED_CODES
                        .iter()
                        .any(|known| code.trim().eq_ignore_ascii_case(known))
                })
                .unwrap_or(false)
        });

        code_matches
            || self
                .message()
                .map(|msg| {
                    let msg = msg.to_ascii_lowercase();
                    NOT_AUTHENTICATED_MESSAGES.iter().any(|m| msg.contains(m))
                })
                .unwrap_or(false)
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }
}

/// Batch decode result.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Objects preceding the terminal, in arrival order.
    pub events: Vec<RawEvent>,
    pub terminal: TerminalResult,
}

/// Incremental decoder for one invocation's stdout.
#[derive(Debug)]
pub struct LineDecoder {
    mode: OutputMode,
    held: Option<RawEvent>,
    objects: usize,
    skipped: usize,
}

impl LineDecoder {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            held: None,
            objects: 0,
            skipped: 0,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Feeds one line (without its terminator).
    ///
    /// Returns the previously held object when this line turned out to hold a
    /// newer one: that older object can no longer be the terminal result.
    pub fn push_line(&mut self, line: &[u8]) -> Option<RawEvent> {
        match parse_object(line) {
            Some(object) => {
                self.objects += 1;
                self.held.replace(object)
            }
            None => {
                if !line.iter().all(u8::is_ascii_whitespace) {
                    self.skipped += 1;
                    tracing::trace!(
                        "Skipping non-protocol CLI output: {}",
                        String::from_utf8_lossy(line)
                    );
                }
                None
            }
        }
    }

    /// Number of JSON objects seen so far.
    pub fn objects_seen(&self) -> usize {
        self.objects
    }

    /// Number of non-blank lines skipped as noise.
    pub fn lines_skipped(&self) -> usize {
        self.skipped
    }

    /// Ends the stream normally; the held object is the terminal result.
    pub fn finish(self) -> Result<TerminalResult, DecodeError> {
        let last = self.held.ok_or(DecodeError::NoJsonObject)?;
        TerminalResult::from_object(last)
    }

    /// Ends the stream abnormally (timeout, cancellation); no terminal result
    /// will follow, so the held object is returned as a possible event.
    pub fn abandon(self) -> Option<RawEvent> {
        self.held
    }
}

/// Decodes a complete stdout capture.
///
/// For [`OutputMode::Simple`] the returned events are informational only.
pub fn decode(stdout: &[u8], mode: OutputMode) -> Result<Decoded, DecodeError> {
    let mut decoder = LineDecoder::new(mode);
    let mut events = Vec::new();
    for line in stdout.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if let Some(event) = decoder.push_line(line) {
            events.push(event);
        }
    }
    let terminal = decoder.finish()?;
    Ok(Decoded { events, terminal })
}

/// Parses one line as a JSON object; anything else is noise.
fn parse_object(line: &[u8]) -> Option<Map<String, Value>> {
    let trimmed = line.trim_ascii();
    if trimmed.first() != Some(&b'{') {
        return None;
    }
    match serde_json::from_slice::<Value>(trimmed) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}
