//! Wire definitions for the aura relay.
//!
//! Three parties speak these shapes: the remote client (over the duplex
//! channel), the relay supervisor, and the agent living inside each execution
//! context. Keeping them in a dependency-light crate lets other clients mirror
//! the JSON without pulling in the runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Opaque correlation token chosen by the remote client.
///
/// The relay never interprets it; it is echoed back verbatim on the response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Value);

impl RequestId {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// Body of a `replace-range` request as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacePayload {
    pub start: usize,
    pub end: usize,
    pub new_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_original: Option<String>,
    /// Signed so clients that fold their hash into an int32 still round-trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_hash: Option<i64>,
}

/// A validated edit command. `start <= end` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub request_id: RequestId,
    pub start: usize,
    pub end: usize,
    pub new_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_hash: Option<i64>,
}

impl Command {
    pub fn new(request_id: RequestId, payload: ReplacePayload) -> Result<Self, DecodeError> {
        if payload.start > payload.end {
            return Err(DecodeError::InvertedRange {
                start: payload.start,
                end: payload.end,
            });
        }
        Ok(Self {
            request_id,
            start: payload.start,
            end: payload.end,
            new_text: payload.new_text,
            expected_original: payload.expected_original,
            document_hash: payload.document_hash,
        })
    }

    /// Convenience constructor used by hosts and tests.
    pub fn replace(
        request_id: impl Into<Value>,
        start: usize,
        end: usize,
        new_text: impl Into<String>,
    ) -> Self {
        Self {
            request_id: RequestId::new(request_id),
            start: start.min(end),
            end: end.max(start),
            new_text: new_text.into(),
            expected_original: None,
            document_hash: None,
        }
    }

    pub fn expecting(mut self, original: impl Into<String>) -> Self {
        self.expected_original = Some(original.into());
        self
    }

    pub fn with_document_hash(mut self, hash: i64) -> Self {
        self.document_hash = Some(hash);
        self
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid replace-range payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("range start {start} is past range end {end}")]
    InvertedRange { start: usize, end: usize },
}

/// Frames the remote client may send over the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    ReplaceRange(Command),
    /// A `replace-range` whose payload could not be decoded. It still gets an
    /// answer so the client can correlate the failure.
    Malformed { request_id: RequestId, reason: String },
}

impl ClientMessage {
    /// Decodes one text frame. Returns `None` for frames that are not JSON or
    /// carry a `type` the relay does not handle.
    pub fn decode(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        if value.get("type").and_then(Value::as_str) != Some("replace-range") {
            return None;
        }
        let request_id = RequestId(value.get("requestId").cloned().unwrap_or(Value::Null));
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        let decoded = serde_json::from_value::<ReplacePayload>(payload)
            .map_err(DecodeError::from)
            .and_then(|payload| Command::new(request_id.clone(), payload));
        Some(match decoded {
            Ok(command) => ClientMessage::ReplaceRange(command),
            Err(err) => ClientMessage::Malformed {
                request_id,
                reason: err.to_string(),
            },
        })
    }
}

/// Error codes carried in the `error` field of a failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NoActiveEditable,
    #[serde(rename = "no-contenteditable")]
    NoContentEditable,
    RangeMismatch,
    DomMapFailed,
    DocumentModified,
    NoTab,
    InjectFailed,
    NoResponse,
    SendFailed,
    Exception,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoActiveEditable => "no-active-editable",
            ErrorKind::NoContentEditable => "no-contenteditable",
            ErrorKind::RangeMismatch => "range-mismatch",
            ErrorKind::DomMapFailed => "dom-map-failed",
            ErrorKind::DocumentModified => "document-modified",
            ErrorKind::NoTab => "no-tab",
            ErrorKind::InjectFailed => "inject-failed",
            ErrorKind::NoResponse => "no-response",
            ErrorKind::SendFailed => "send-failed",
            ErrorKind::Exception => "exception",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which host primitive ended up applying the edit. The wire names are the
/// ones clients already match on, which is why they mix casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplaceMethod {
    /// Field-level range replace; keeps the field's undo history.
    #[serde(rename = "setRangeText")]
    SetRangeText,
    /// Whole-value overwrite for fields without a range primitive.
    #[serde(rename = "value-overwrite")]
    ValueOverwrite,
    /// Host text insertion that keeps the surrounding formatting.
    #[serde(rename = "execCommand")]
    InsertText,
    /// Explicit delete of the node range followed by a new text node.
    #[serde(rename = "range-insert")]
    RangeInsert,
}

impl ReplaceMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplaceMethod::SetRangeText => "setRangeText",
            ReplaceMethod::ValueOverwrite => "value-overwrite",
            ReplaceMethod::InsertText => "execCommand",
            ReplaceMethod::RangeInsert => "range-insert",
        }
    }
}

/// Response to a `replace-range` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceResult {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ReplaceMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_length: Option<usize>,
}

impl ReplaceResult {
    pub fn applied(
        request_id: RequestId,
        method: ReplaceMethod,
        replaced_length: usize,
        new_length: usize,
    ) -> Self {
        Self {
            request_id,
            success: true,
            error: None,
            details: None,
            method: Some(method),
            replaced_length: Some(replaced_length),
            new_length: Some(new_length),
        }
    }

    pub fn failed(request_id: RequestId, error: ErrorKind) -> Self {
        Self {
            request_id,
            success: false,
            error: Some(error),
            details: None,
            method: None,
            replaced_length: None,
            new_length: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages the relay sends into an execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContextMessage {
    Ping,
    ExtensionReady,
    ReplaceRange(Command),
}

impl ContextMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ContextMessage::Ping => "ping",
            ContextMessage::ExtensionReady => "extension-ready",
            ContextMessage::ReplaceRange(_) => "replace-range",
        }
    }
}

/// `{pong: true}` answer to a context probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub pong: bool,
}

/// What an agent answers with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextReply {
    Pong(Pong),
    Replaced(ReplaceResult),
}

impl ContextReply {
    pub fn pong() -> Self {
        ContextReply::Pong(Pong { pong: true })
    }
}

/// Requests an agent may send back towards the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContextRequest {
    /// Sent after every reply so the relay sees the context as active.
    Noop,
    CheckConnection,
}

/// Answer to `check-connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Current reconnect delay in milliseconds.
    pub backoff: u64,
}

/// Unsolicited frames the relay pushes to the remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayNotice {
    Heartbeat { ts: u64 },
}
