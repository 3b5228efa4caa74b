// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payloads exchanged with the bot backend, and the event names they travel under.
//!
//! Parsing happens at the transport boundary: handlers receive raw JSON,
//! call [`parse`] for the expected shape and discard the event on failure.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QbotError;
use crate::types::{lenient, Message, Reference};

/// Event names used on both transports.
pub mod events {
    /// Outbound question (socket).
    pub const SEND: &str = "send";
    /// Outbound stop request (socket).
    pub const STOP_GENERATION: &str = "stop_generation";

    pub const REPLY: &str = "reply";
    pub const REFERENCE: &str = "reference";
    pub const TOKEN_STAT: &str = "token_stat";
    pub const THOUGHT: &str = "thought";
    pub const ERROR: &str = "error";

    /// Metadata events some backends push early in an event stream.
    pub const CONFIG: &str = "config";
    pub const INIT: &str = "init";
    pub const SESSION: &str = "session";
    pub const BOT_INFO: &str = "bot_info";

    /// All event types that carry bot/session metadata.
    pub const METADATA: [&str; 4] = [CONFIG, INIT, SESSION, BOT_INFO];
}

/// Envelope field the backend may wrap payloads in.
pub const ENVELOPE_FIELD: &str = "payload";

/// Removes a single `{"payload": ...}` wrapper if present.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key(ENVELOPE_FIELD) => map
            .remove(ENVELOPE_FIELD)
            .unwrap_or(Value::Null),
        other => other,
    }
}

/// Wraps an outbound payload in the socket envelope.
pub fn wrap_envelope(value: Value) -> Value {
    serde_json::json!({ ENVELOPE_FIELD: value })
}

/// Decodes a raw payload into a typed wire shape.
pub fn parse<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, QbotError> {
    serde_json::from_value(value).map_err(|e| QbotError::malformed(what, e))
}

/// A streamed reply (or reply update) for one record.
///
/// Replies share the canonical [`Message`] shape, including `quote_infos`.
pub type ReplyEvent = Message;

/// Reference list for an existing record.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReferenceEvent {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub record_id: Option<String>,

    #[serde(default)]
    pub references: Vec<Reference>,
}

/// Error pushed by the backend, either bare or as `{"error": {...}}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerErrorEvent {
    #[serde(default)]
    pub error: Option<ServerErrorBody>,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerErrorBody {
    #[serde(default)]
    pub code: Option<Value>,

    #[serde(default)]
    pub message: Option<String>,
}

impl ServerErrorEvent {
    /// Best available human-readable message.
    pub fn describe(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.message.clone())
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "service error".to_string())
    }
}

/// Outbound question on the socket transport (wrapped in the envelope on send).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundQuestion {
    pub request_id: String,
    pub session_id: String,
    pub content: String,
}

/// Outbound question on the event-stream transport, sent as the whole POST body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamQuestion {
    pub request_id: String,
    pub content: String,
    pub bot_app_key: String,
    pub visitor_biz_id: String,
    pub session_id: String,
    #[serde(default)]
    pub visitor_labels: Vec<String>,
}

/// Advisory stop request for the reply being streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopGeneration {
    pub record_id: Option<String>,
}

/// Token issued by the bootstrap endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    /// Expiry as a unix timestamp in seconds.
    pub expire_time: i64,
}
