// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the qbot chat client.

use thiserror::Error;

/// The primary error type used across transports, the session store and the engine.
#[derive(Debug, Error)]
pub enum QbotError {
    /// Configuration errors (invalid values, missing endpoint, bad header value).
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport errors (connection refused, dropped socket, HTTP failure).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed frames or payloads received from the backend.
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The token bootstrap endpoint failed or returned no token.
    #[error("token error: {message}")]
    Token {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Reading or writing the local config snapshot failed.
    #[error("persistence error: {source}")]
    Persistence {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// The client actor or a channel it owns has shut down.
    #[error("client is closed")]
    Closed,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QbotError {
    /// Shorthand for a [`QbotError::Protocol`] wrapping a JSON decode failure.
    pub fn malformed(what: &str, err: serde_json::Error) -> Self {
        QbotError::Protocol {
            message: format!("malformed {what} payload: {err}"),
            source: Some(Box::new(err)),
        }
    }
}
