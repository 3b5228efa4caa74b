// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine.IO v4 / Socket.IO v5 text framing, default namespace only.
//!
//! A WebSocket text frame carries one Engine.IO packet: a single digit type
//! followed by its data. Engine.IO `message` packets (`4`) carry a
//! Socket.IO packet: another type digit, an optional `/namespace,`, an
//! optional ack id and a JSON body.

use qbot_core::QbotError;
use serde::Deserialize;
use serde_json::Value;

/// Handshake data sent by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace connect; client side carries the auth object, server side the session.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Packet::Event {
            name: name.into(),
            data,
        }
    }

    /// Renders the packet as a WebSocket text frame.
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(info) => format!(
                "0{}",
                serde_json::json!({
                    "sid": info.sid,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                })
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(auth)) => format!("40{auth}"),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, data } => {
                format!("42{}", Value::Array(vec![Value::String(name.clone()), data.clone()]))
            }
            Packet::ConnectError(data) => format!("44{data}"),
        }
    }

    /// Parses a WebSocket text frame.
    pub fn decode(frame: &str) -> Result<Packet, QbotError> {
        let mut chars = frame.chars();
        let engine = chars
            .next()
            .ok_or_else(|| protocol("empty frame".to_string()))?;
        let rest = chars.as_str();
        match engine {
            '0' => serde_json::from_str(rest)
                .map(Packet::Open)
                .map_err(|e| QbotError::malformed("open", e)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '6' => Ok(Packet::Noop),
            '4' => decode_message(rest),
            other => Err(protocol(format!("unsupported engine packet type `{other}`"))),
        }
    }
}

fn decode_message(body: &str) -> Result<Packet, QbotError> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| protocol("empty message packet".to_string()))?;
    let json = strip_ack_id(strip_namespace(chars.as_str()));

    let parse = |what: &str| -> Result<Option<Value>, QbotError> {
        if json.is_empty() {
            Ok(None)
        } else {
            serde_json::from_str(json)
                .map(Some)
                .map_err(|e| QbotError::malformed(what, e))
        }
    };

    match kind {
        '0' => parse("connect").map(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let Some(Value::Array(mut items)) = parse("event")? else {
                return Err(protocol("event packet is not an array".to_string()));
            };
            if items.is_empty() {
                return Err(protocol("event packet has no name".to_string()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => return Err(protocol(format!("event name is not a string: {other}"))),
            };
            let data = if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            };
            Ok(Packet::Event { name, data })
        }
        '4' => Ok(Packet::ConnectError(parse("connect_error")?.unwrap_or(Value::Null))),
        other => Err(protocol(format!("unsupported socket packet type `{other}`"))),
    }
}

fn strip_namespace(s: &str) -> &str {
    if s.starts_with('/') {
        s.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        s
    }
}

fn strip_ack_id(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn protocol(message: String) -> QbotError {
    QbotError::Protocol {
        message,
        source: None,
    }
}

/// Builds the WebSocket URL for an Engine.IO v4 handshake.
pub fn handshake_url(origin: &str, path: &str) -> String {
    let origin = origin.trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("{origin}{path}?EIO=4&transport=websocket")
}
