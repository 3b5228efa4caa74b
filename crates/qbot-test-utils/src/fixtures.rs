// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builders for inbound payloads in the shape the backend sends them.

use serde_json::{json, Value};

/// Server acknowledgment of a locally sent question.
pub fn ack(session_id: &str, request_id: &str, record_id: &str, timestamp: i64) -> Value {
    json!({
        "session_id": session_id,
        "request_id": request_id,
        "record_id": record_id,
        "is_from_self": true,
        "is_final": true,
        "timestamp": timestamp,
        "content": "question",
    })
}

/// A bot reply chunk. Content is cumulative, as the backend streams it.
pub fn reply(session_id: &str, record_id: &str, content: &str, timestamp: i64, is_final: bool) -> Value {
    json!({
        "session_id": session_id,
        "record_id": record_id,
        "content": content,
        "is_from_self": false,
        "is_final": is_final,
        "timestamp": timestamp.to_string(),
    })
}

/// Token statistics with one procedure per title.
pub fn token_stat(session_id: &str, record_id: &str, titles: &[&str]) -> Value {
    let procedures: Vec<Value> = titles
        .iter()
        .map(|t| json!({"name": "step", "title": t, "status": "processing"}))
        .collect();
    json!({
        "session_id": session_id,
        "record_id": record_id,
        "procedures": procedures,
    })
}

pub fn references(record_id: &str, refs: Value) -> Value {
    json!({ "record_id": record_id, "references": refs })
}

pub fn thought(session_id: &str, record_id: &str, procedures: Value) -> Value {
    json!({
        "session_id": session_id,
        "record_id": record_id,
        "procedures": procedures,
    })
}

/// Wraps a payload the way the socket backend does.
pub fn enveloped(payload: Value) -> Value {
    json!({ "payload": payload })
}
