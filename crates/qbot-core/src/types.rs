// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical message model shared by the transports, the session store and
//! the reconciliation engine.
//!
//! The backend sends loosely typed JSON: ids may be numbers or strings,
//! timestamps may be numeric strings, and optional fields come and go. All of
//! that is absorbed here, at deserialization time, so the engine only ever
//! sees one shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Which kind of reconciliation step produced a transcript change.
///
/// Serialized with the single-letter codes the backend and UI exchange.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum MessageKind {
    #[serde(rename = "Q")]
    #[strum(serialize = "Q")]
    Question,
    #[serde(rename = "A")]
    #[strum(serialize = "A")]
    Answer,
    #[serde(rename = "H")]
    #[strum(serialize = "H")]
    History,
    #[serde(rename = "S")]
    #[strum(serialize = "S")]
    Stop,
    #[serde(rename = "R")]
    #[strum(serialize = "R")]
    Reference,
}

impl MessageKind {
    /// Whether a view should scroll to the newest entry after this change.
    ///
    /// Stopping a reply must leave the scroll position where the user put it.
    pub fn should_autoscroll(self) -> bool {
        !matches!(self, MessageKind::Stop)
    }
}

/// A single transcript entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identity, present once the server starts replying.
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub record_id: Option<String>,

    /// Client-assigned identity of a locally sent question.
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub request_id: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub session_id: Option<String>,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub is_from_self: bool,

    /// Milliseconds since the epoch.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub timestamp: i64,

    /// False while the reply is still streaming.
    #[serde(default)]
    pub is_final: bool,

    #[serde(default)]
    pub is_loading: bool,

    /// Synthetic "thinking" row inserted after an acknowledged question.
    #[serde(default, alias = "loading_message")]
    pub is_placeholder: bool,

    #[serde(default)]
    pub is_history: bool,

    #[serde(default)]
    pub is_evil: bool,

    /// Set locally when no reply arrived within the send timeout.
    #[serde(default)]
    pub failed: bool,

    #[serde(default)]
    pub references: Vec<Reference>,

    #[serde(default)]
    pub quote_infos: Vec<QuoteInfo>,

    #[serde(default)]
    pub agent_thought: Option<AgentThought>,

    #[serde(default, alias = "tokens_msg")]
    pub token_usage: Option<TokenStat>,

    #[serde(default)]
    pub transfer: Option<bool>,

    #[serde(default)]
    pub quit: Option<bool>,

    #[serde(default, alias = "transferRobot")]
    pub transfer_robot: Option<bool>,

    #[serde(default)]
    pub from_name: Option<String>,

    #[serde(default)]
    pub from_avatar: Option<String>,

    /// Status line shown on a placeholder (title of the latest procedure).
    #[serde(default)]
    pub loading_text: Option<String>,

    /// Backend fields the client does not interpret, kept for display.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Returns the record id if it is present and non-empty.
    pub fn record(&self) -> Option<&str> {
        self.record_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns the request id if it is present and non-empty.
    pub fn request(&self) -> Option<&str> {
        self.request_id.as_deref().filter(|id| !id.is_empty())
    }

    /// True when both messages carry the same non-empty record id.
    pub fn same_record(&self, other: &Message) -> bool {
        matches!((self.record(), other.record()), (Some(a), Some(b)) if a == b)
    }

    /// True while this entry is the reply currently being streamed.
    pub fn is_streaming(&self) -> bool {
        !self.is_final
    }
}

/// A citation record attached to a reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub id: Option<String>,

    /// Position marker used by procedure traces; promoted to `id` there.
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub index: Option<String>,

    /// Reference category. Type 1 entries are internal and never displayed.
    #[serde(default, rename = "type")]
    pub kind: Option<i64>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reference category the backend uses for entries that must not be shown.
pub const HIDDEN_REFERENCE_KIND: i64 = 1;

impl Reference {
    /// Whether this reference should be shown alongside the reply.
    pub fn is_visible(&self) -> bool {
        self.kind != Some(HIDDEN_REFERENCE_KIND)
    }
}

/// Positional citation marker: reference `index` cited at character `position`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteInfo {
    #[serde(default, deserialize_with = "lenient::integer")]
    pub index: i64,

    #[serde(default, deserialize_with = "lenient::position")]
    pub position: usize,
}

/// Ordered reasoning and tool-call steps associated with one reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentThought {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub session_id: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub record_id: Option<String>,

    #[serde(default)]
    pub procedures: Vec<Procedure>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a procedure step should be displayed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ShowType {
    /// Free-form reasoning text, rendered as markdown.
    Md,
    /// A web search step with citations.
    SearchReference,
    /// A knowledge-base lookup step.
    KnowledgeReference,
    /// Anything else, rendered as raw JSON.
    Json,
}

/// One step of a thought trace, or one entry of a token-stat breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub debugging: Option<Debugging>,

    #[serde(default)]
    pub show_type: Option<ShowType>,

    #[serde(default)]
    pub display_content: Option<String>,

    /// Token counters in whatever naming the backend used.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Debug payload attached to a procedure step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Debugging {
    #[serde(default)]
    pub display_type: Option<i64>,

    #[serde(default)]
    pub display_content: Option<String>,

    #[serde(default)]
    pub quote_infos: Vec<QuoteInfo>,

    #[serde(default)]
    pub references: Vec<Reference>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Token-usage statistics pushed while a reply is produced.
///
/// Counter fields are kept as raw JSON because the backend uses several
/// naming schemes (`total_tokens`, `totalTokens`, `token_count`, `usage.*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenStat {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub session_id: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub record_id: Option<String>,

    #[serde(default)]
    pub procedures: Vec<Procedure>,

    #[serde(flatten)]
    pub counters: Map<String, Value>,
}

impl TokenStat {
    /// Title of the most recent procedure, if it has one.
    pub fn latest_title(&self) -> Option<&str> {
        self.procedures
            .last()
            .map(|p| p.title.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Normalized bot metadata for the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub avatar: String,

    #[serde(default = "default_available")]
    pub is_available: bool,

    #[serde(default)]
    pub bot_biz_id: String,

    #[serde(default)]
    pub session_id: String,

    /// Backend-specific extras, flattened next to the canonical fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_available() -> bool {
    true
}

/// Deserializers that accept the backend's loose typing.
pub mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Interprets a JSON value as an integer: numbers, numeric strings, or null (0).
    pub fn value_to_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
            }
            _ => None,
        }
    }

    /// Identifier that may arrive as a string or a number; empty becomes `None`.
    pub fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    /// Millisecond timestamp that may arrive as a number or numeric string.
    pub fn timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(value_to_i64).unwrap_or(0))
    }

    pub fn integer<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        timestamp(deserializer)
    }

    /// Character offset; negative values clamp to zero.
    pub fn position<'de, D>(deserializer: D) -> Result<usize, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = timestamp(deserializer)?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}
