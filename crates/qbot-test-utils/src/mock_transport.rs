// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock transport for deterministic testing.
//!
//! `MockTransport` implements `Transport` with injectable inbound events and
//! captured outbound events for assertion in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use qbot_core::{InboundHandler, QbotError, Transport, TransportKind};
use qbot_transport::ListenerRegistry;
use serde_json::Value;
use tracing::debug;

/// A mock backend connection for testing.
///
/// - **inbound**: events passed to [`emit`](Self::emit) reach the registered handlers
/// - **sent**: events passed to `send()` are captured and retrievable via [`sent`](Self::sent)
pub struct MockTransport {
    kind: TransportKind,
    registry: ListenerRegistry,
    sent: Mutex<Vec<(String, Value)>>,
    connected: AtomicBool,
    connects: AtomicUsize,
    cancellations: AtomicUsize,
    stream_active: AtomicBool,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            registry: ListenerRegistry::new(),
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            cancellations: AtomicUsize::new(0),
            stream_active: AtomicBool::new(false),
        }
    }

    /// Mock of the persistent-socket transport.
    pub fn socket() -> Self {
        Self::new(TransportKind::Socket)
    }

    /// Mock of the event-stream transport.
    pub fn event_stream() -> Self {
        Self::new(TransportKind::EventStream)
    }

    /// Deliver an inbound event to the registered handlers.
    ///
    /// Returns the number of handlers that ran.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.registry.dispatch(event, payload)
    }

    /// Every `(event, payload)` passed to `send()`, in order.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Payloads sent under one event name.
    pub fn sent_events(&self, event: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of successful `cancel_active()` calls.
    pub fn cancel_count(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.registry.handler_count(event)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self) -> Result<(), QbotError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), QbotError> {
        debug!(event, "mock transport captured send");
        if self.kind == TransportKind::EventStream {
            self.stream_active.store(true, Ordering::SeqCst);
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((event.to_string(), payload));
        Ok(())
    }

    fn on(&self, event: &str, handler: InboundHandler) {
        self.registry.register(event, handler);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), QbotError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_active(&self) -> bool {
        let was_active = self.stream_active.swap(false, Ordering::SeqCst);
        if was_active {
            self.cancellations.fetch_add(1, Ordering::SeqCst);
        }
        was_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn send_captures_outbound_events() {
        let transport = MockTransport::socket();
        transport
            .send("send", serde_json::json!({"content": "hi"}))
            .await
            .unwrap();
        assert_eq!(transport.sent_events("send")[0]["content"], "hi");
        assert!(transport.sent_events("stop_generation").is_empty());
    }

    #[tokio::test]
    async fn emit_reaches_handlers_with_envelope_removed() {
        let transport = MockTransport::socket();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport.on(
            "reply",
            Arc::new(move |v: Value| sink.lock().unwrap().push(v)),
        );
        let ran = transport.emit("reply", serde_json::json!({"payload": {"content": "x"}}));
        assert_eq!(ran, 1);
        assert_eq!(seen.lock().unwrap()[0]["content"], "x");
    }

    #[tokio::test]
    async fn cancel_only_counts_live_streams() {
        let transport = MockTransport::event_stream();
        assert!(!transport.cancel_active());
        transport.send("send", Value::Null).await.unwrap();
        assert!(transport.cancel_active());
        assert!(!transport.cancel_active());
        assert_eq!(transport.cancel_count(), 1);
    }
}
