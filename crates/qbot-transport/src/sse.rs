// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event-stream transport.
//!
//! Each outbound question is one POST whose response body is a stream of
//! server-sent events. Every event's data is JSON `{type, payload}` and is
//! dispatched to the handlers registered for `type`. Only the most recent
//! stream can be cancelled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use qbot_bus::{BusEvent, ConnectionEvent, EventBus};
use qbot_config::model::SseConfig;
use qbot_core::wire::{OutboundQuestion, StreamQuestion, events, parse};
use qbot_core::{InboundHandler, QbotError, Transport, TransportKind};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::ListenerRegistry;

/// Cancellation handle of the stream currently being read.
struct ActiveStream {
    id: u64,
    cancel: CancellationToken,
}

struct Shared {
    client: reqwest::Client,
    config: SseConfig,
    bus: Arc<EventBus>,
    registry: ListenerRegistry,
    active: Mutex<Option<ActiveStream>>,
    next_stream: AtomicU64,
}

impl Shared {
    fn clear_active(&self, id: u64) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    fn report(&self, message: String) {
        warn!(%message, "event stream failed");
        self.bus
            .publish(BusEvent::Connection(ConnectionEvent::Error(message)));
    }
}

/// Server-sent-event client over `reqwest` and `eventsource-stream`.
pub struct SseTransport {
    shared: Arc<Shared>,
    ready: AtomicBool,
}

impl SseTransport {
    pub fn new(config: &SseConfig, bus: Arc<EventBus>) -> Result<Self, QbotError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| QbotError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                config: config.clone(),
                bus,
                registry: ListenerRegistry::new(),
                active: Mutex::new(None),
                next_stream: AtomicU64::new(1),
            }),
            ready: AtomicBool::new(false),
        })
    }

    fn request_body(&self, payload: Value) -> Result<StreamQuestion, QbotError> {
        let question: OutboundQuestion = parse("outbound question", payload)?;
        Ok(StreamQuestion {
            request_id: question.request_id,
            content: question.content,
            bot_app_key: self.shared.config.bot_app_key.clone(),
            visitor_biz_id: self.shared.config.visitor_biz_id.clone(),
            session_id: question.session_id,
            visitor_labels: Vec::new(),
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::EventStream
    }

    /// There is no standing connection; this only marks the transport usable.
    async fn connect(&self) -> Result<(), QbotError> {
        if !self.ready.swap(true, Ordering::SeqCst) {
            self.shared
                .bus
                .publish(BusEvent::Connection(ConnectionEvent::Connect));
        }
        Ok(())
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), QbotError> {
        if event != events::SEND {
            debug!(event, "event stream only carries questions, event dropped");
            return Ok(());
        }
        let body = self.request_body(payload)?;
        let id = self.shared.next_stream.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        // A newer question takes over the cancel slot; the older stream runs to completion.
        *self
            .shared
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(ActiveStream {
            id,
            cancel: cancel.clone(),
        });

        tokio::spawn(stream_reply(Arc::clone(&self.shared), id, body, cancel));
        Ok(())
    }

    fn on(&self, event: &str, handler: InboundHandler) {
        self.shared.registry.register(event, handler);
    }

    fn is_connected(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), QbotError> {
        self.cancel_active();
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_active(&self) -> bool {
        let active = self
            .shared
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match active {
            Some(stream) if !stream.cancel.is_cancelled() => {
                stream.cancel.cancel();
                info!(stream = stream.id, "event stream cancelled");
                true
            }
            _ => false,
        }
    }
}

/// Picks the part of a stream event handlers should see.
///
/// Events normally nest their body under `payload`; some metadata events
/// use `data` or put the fields at the top level.
fn event_body(event: &Value) -> Value {
    event
        .get("payload")
        .or_else(|| event.get("data"))
        .cloned()
        .unwrap_or_else(|| event.clone())
}

async fn stream_reply(shared: Arc<Shared>, id: u64, body: StreamQuestion, cancel: CancellationToken) {
    let request_id = body.request_id.clone();
    debug!(%request_id, url = %shared.config.url, "opening event stream");

    let request = shared.client.post(&shared.config.url).json(&body).send();
    let response = tokio::select! {
        _ = cancel.cancelled() => {
            shared.clear_active(id);
            return;
        }
        result = request => result,
    };

    let response = match response {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            let status = r.status();
            let text = r.text().await.unwrap_or_default();
            shared.report(format!("event stream returned {status}: {text}"));
            shared.clear_active(id);
            return;
        }
        Err(e) => {
            shared.report(format!("event stream request failed: {e}"));
            shared.clear_active(id);
            return;
        }
    };

    let mut events = Box::pin(response.bytes_stream().eventsource());
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%request_id, "event stream dropped after cancellation");
                break;
            }
            next = events.next() => next,
        };
        match next {
            None => {
                debug!(%request_id, "event stream finished");
                break;
            }
            Some(Err(e)) => {
                shared.report(format!("event stream interrupted: {e}"));
                break;
            }
            Some(Ok(event)) => {
                if event.data.trim().is_empty() {
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(%request_id, error = %e, "discarding non-JSON stream event");
                        continue;
                    }
                };
                let Some(kind) = parsed.get("type").and_then(Value::as_str).map(str::to_string)
                else {
                    warn!(%request_id, "discarding stream event without type");
                    continue;
                };
                shared.registry.dispatch(&kind, event_body(&parsed));
            }
        }
    }
    shared.clear_active(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_body_prefers_payload_then_data() {
        assert_eq!(event_body(&json!({"type": "reply", "payload": {"a": 1}})), json!({"a": 1}));
        assert_eq!(event_body(&json!({"type": "config", "data": {"b": 2}})), json!({"b": 2}));
        let bare = json!({"type": "bot_info", "name": "x"});
        assert_eq!(event_body(&bare), bare);
    }

    #[tokio::test]
    async fn cancel_without_stream_is_noop() {
        let transport = SseTransport::new(&SseConfig::default(), Arc::new(EventBus::new())).unwrap();
        assert!(!transport.cancel_active());
    }

    #[tokio::test]
    async fn connect_publishes_once() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        bus.subscribe(qbot_bus::Topic::Connection, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let transport = SseTransport::new(&SseConfig::default(), Arc::clone(&bus)).unwrap();
        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_body_carries_app_key_and_visitor() {
        let config = SseConfig {
            bot_app_key: "app".into(),
            ..SseConfig::default()
        };
        let transport = SseTransport::new(&config, Arc::new(EventBus::new())).unwrap();
        let body = transport
            .request_body(json!({"request_id": "q1", "session_id": "s1", "content": "hi"}))
            .unwrap();
        assert_eq!(body.bot_app_key, "app");
        assert_eq!(body.visitor_biz_id, "1");
        assert!(body.visitor_labels.is_empty());
    }
}
