// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the qbot chat client.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use qbot_core::TransportKind;
use serde::{Deserialize, Serialize};

/// Top-level qbot configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QbotConfig {
    /// Client behavior: transport choice, send timeout, stop marker.
    #[serde(default)]
    pub client: ClientConfig,

    /// Persistent-socket transport settings.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Event-stream transport settings.
    #[serde(default)]
    pub sse: SseConfig,

    /// Token bootstrap endpoint.
    #[serde(default)]
    pub token: TokenConfig,

    /// Injected initial bot metadata. Takes precedence over the stored snapshot.
    #[serde(default)]
    pub bot: Option<BotSeedConfig>,

    /// Local persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// How the backend marks the streaming reply while thought traces arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingPattern {
    /// The placeholder becomes the streaming entry as soon as token stats arrive.
    #[default]
    Standard,
    /// The placeholder stays final until the first reply chunk.
    Brief,
}

/// Client behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Transport to use: `ws` (persistent socket) or `sse` (event stream).
    #[serde(default = "default_access")]
    pub access: TransportKind,

    /// Seconds to wait for the first acknowledgment before marking a send failed.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Text appended to a reply when the user stops generation.
    #[serde(default = "default_stop_marker")]
    pub stop_marker: String,

    #[serde(default)]
    pub streaming_pattern: StreamingPattern,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            access: default_access(),
            send_timeout_secs: default_send_timeout_secs(),
            stop_marker: default_stop_marker(),
            streaming_pattern: StreamingPattern::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_access() -> TransportKind {
    TransportKind::Socket
}

fn default_send_timeout_secs() -> u64 {
    120
}

fn default_stop_marker() -> String {
    "<span class=\"stop-ws\">| 已停止生成</span>".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Persistent-socket transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SocketConfig {
    /// Origin of the socket server (`ws://` or `wss://`).
    #[serde(default = "default_socket_url")]
    pub url: String,

    /// Handshake path on the socket server.
    #[serde(default = "default_socket_path")]
    pub path: String,

    /// Initial reconnection delay in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the doubling reconnection delay.
    #[serde(default = "default_reconnect_delay_max_ms")]
    pub reconnect_delay_max_ms: u64,

    /// Maximum reconnection attempts. `0` retries forever.
    #[serde(default)]
    pub reconnect_attempts: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: default_socket_url(),
            path: default_socket_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_delay_max_ms: default_reconnect_delay_max_ms(),
            reconnect_attempts: 0,
        }
    }
}

fn default_socket_url() -> String {
    "wss://wss.lke.cloud.tencent.com".to_string()
}

fn default_socket_path() -> String {
    "/v1/qbot/chat/conn/".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_reconnect_delay_max_ms() -> u64 {
    5000
}

/// Event-stream transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SseConfig {
    /// Full URL of the streaming chat endpoint.
    #[serde(default = "default_sse_url")]
    pub url: String,

    /// Application key of the bot. Required when `client.access = "sse"`.
    #[serde(default)]
    pub bot_app_key: String,

    /// Visitor identifier sent with every question.
    #[serde(default = "default_visitor_biz_id")]
    pub visitor_biz_id: String,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            url: default_sse_url(),
            bot_app_key: String::new(),
            visitor_biz_id: default_visitor_biz_id(),
        }
    }
}

fn default_sse_url() -> String {
    "https://wss.lke.cloud.tencent.com/v1/qbot/chat/sse".to_string()
}

fn default_visitor_biz_id() -> String {
    "1".to_string()
}

/// Token bootstrap configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// URL of the local token-issuing endpoint.
    #[serde(default = "default_token_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds.
    #[serde(default = "default_token_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            endpoint: default_token_endpoint(),
            timeout_secs: default_token_timeout_secs(),
        }
    }
}

fn default_token_endpoint() -> String {
    "http://127.0.0.1:3000/getDemoToken".to_string()
}

fn default_token_timeout_secs() -> u64 {
    10
}

/// Initial bot metadata supplied by the embedder.
///
/// Field names follow the canonical shape; the session store still runs
/// its normalization over it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BotSeedConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub avatar: Option<String>,

    #[serde(default)]
    pub is_available: Option<bool>,

    #[serde(default)]
    pub bot_biz_id: Option<String>,
}

impl BotSeedConfig {
    /// Renders the seed as the JSON object the session store normalizes.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(name) = &self.name {
            map.insert("name".into(), name.clone().into());
        }
        if let Some(avatar) = &self.avatar {
            map.insert("avatar".into(), avatar.clone().into());
        }
        if let Some(available) = self.is_available {
            map.insert("is_available".into(), available.into());
        }
        if let Some(id) = &self.bot_biz_id {
            map.insert("bot_biz_id".into(), id.clone().into());
        }
        serde_json::Value::Object(map)
    }
}

/// Local persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path of the JSON file holding the last-known bot config snapshot.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_snapshot_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("qbot").join("qbot_config.json"))
        .unwrap_or_else(|| std::path::PathBuf::from("qbot_config.json"))
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_conventions() {
        let config = QbotConfig::default();
        assert_eq!(config.client.access, TransportKind::Socket);
        assert_eq!(config.client.send_timeout_secs, 120);
        assert_eq!(config.socket.path, "/v1/qbot/chat/conn/");
        assert_eq!(config.sse.visitor_biz_id, "1");
        assert!(config.bot.is_none());
        assert!(config.storage.snapshot_path.ends_with("qbot_config.json"));
    }

    #[test]
    fn access_parses_short_names() {
        let config: QbotConfig = toml::from_str("[client]\naccess = \"sse\"\n").unwrap();
        assert_eq!(config.client.access, TransportKind::EventStream);
    }

    #[test]
    fn streaming_pattern_parses_lowercase() {
        let config: QbotConfig =
            toml::from_str("[client]\nstreaming_pattern = \"brief\"\n").unwrap();
        assert_eq!(config.client.streaming_pattern, StreamingPattern::Brief);
    }

    #[test]
    fn bot_seed_to_json_skips_unset_fields() {
        let seed = BotSeedConfig {
            name: Some("helper".into()),
            ..Default::default()
        };
        let json = seed.to_json();
        assert_eq!(json["name"], "helper");
        assert!(json.get("avatar").is_none());
    }

    #[test]
    fn bot_section_denies_unknown_fields() {
        let result = toml::from_str::<QbotConfig>("[bot]\nnmae = \"x\"\n");
        assert!(result.is_err());
    }
}
