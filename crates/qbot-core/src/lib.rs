// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the qbot chat client.
//!
//! This crate provides the canonical message model, the backend's wire
//! payloads, the error type, and the [`Transport`] trait that both the
//! persistent-socket and event-stream adapters implement.

pub mod error;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export key items at crate root for ergonomic imports.
pub use error::QbotError;
pub use traits::{InboundHandler, Transport, TransportKind};
pub use types::{
    AgentThought, BotConfig, Debugging, Message, MessageKind, Procedure, QuoteInfo, Reference, ShowType,
    TokenStat,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn qbot_error_has_all_variants() {
        let _config = QbotError::Config("test".into());
        let _transport = QbotError::Transport {
            message: "test".into(),
            source: None,
        };
        let _protocol = QbotError::Protocol {
            message: "test".into(),
            source: None,
        };
        let _token = QbotError::Token {
            message: "test".into(),
            source: None,
        };
        let _persistence = QbotError::Persistence {
            source: Box::new(std::io::Error::other("test")),
        };
        let _timeout = QbotError::Timeout {
            duration: std::time::Duration::from_secs(120),
        };
        let _closed = QbotError::Closed;
        let _internal = QbotError::Internal("test".into());
    }

    #[test]
    fn transport_kind_round_trips_through_str() {
        for kind in [TransportKind::Socket, TransportKind::EventStream] {
            let parsed = TransportKind::from_str(&kind.to_string()).expect("should parse back");
            assert_eq!(kind, parsed);
        }
        assert_eq!(TransportKind::Socket.to_string(), "ws");
        assert_eq!(TransportKind::EventStream.to_string(), "sse");
    }

    #[test]
    fn transport_trait_is_object_safe() {
        fn _assert_dyn(_: &dyn Transport) {}
    }
}
