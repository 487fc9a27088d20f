//! Wire message envelope for the cmake server protocol.
//!
//! Every payload on the wire is a JSON object with a required `type` field.
//! Messages that answer a request additionally carry the client-chosen
//! `cookie` and an `inReplyTo` naming the request type. The envelope is a
//! tagged sum so dispatch is an exhaustive match, not field sniffing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Signal name the server sends when the configuration is out of date.
pub const SIGNAL_DIRTY: &str = "dirty";

/// Signal name for an out-of-process edit to a watched build file.
///
/// Accepted and ignored: the server emits it, but no consumer behavior is
/// defined for it yet.
pub const SIGNAL_FILE_CHANGE: &str = "fileChange";

/// A protocol version pair advertised in the `hello` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

/// Content of the unsolicited `hello` message that opens every conversation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloContent {
    pub supported_protocol_versions: Vec<ProtocolVersion>,
}

/// A terminal `reply` to a cookied request. The content fields (everything
/// other than the envelope) are kept as a raw map; the caller deserializes
/// them into the per-kind reply type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub cookie: String,
    pub in_reply_to: String,
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

/// A terminal `error` answering a cookied request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub cookie: String,
    pub in_reply_to: String,
    pub error_message: String,
}

/// A non-terminal `progress` update for an in-flight request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEnvelope {
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub progress_message: String,
    #[serde(default)]
    pub progress_minimum: i64,
    #[serde(default)]
    pub progress_maximum: i64,
    #[serde(default)]
    pub progress_current: i64,
}

/// A non-terminal display `message` for an in-flight request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMessageContent {
    #[serde(default)]
    pub cookie: String,
    pub message: String,
    #[serde(default)]
    pub title: String,
}

/// An unsolicited out-of-band `signal` (no cookie, no reply expected).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub name: String,
}

/// The set of messages the server sends to the client.
///
/// Outbound requests are built as plain JSON objects by the client (they
/// always carry `{type, cookie}` plus kind-specific parameters), so only the
/// inbound direction needs a typed union.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IncomingMessage {
    Hello(HelloContent),
    Reply(ReplyEnvelope),
    Error(ErrorEnvelope),
    Progress(ProgressEnvelope),
    Message(DisplayMessageContent),
    Signal(SignalEnvelope),
}
