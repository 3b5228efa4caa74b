// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event-stream transport against a mock HTTP backend.

use std::sync::Arc;
use std::time::Duration;

use qbot_bus::{BusEvent, ConnectionEvent, EventBus, Topic};
use qbot_config::model::SseConfig;
use qbot_core::Transport;
use qbot_transport::SseTransport;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(events: &[Value]) -> String {
    events
        .iter()
        .map(|e| format!("data: {e}\n\n"))
        .collect::<String>()
}

fn transport_for(server: &MockServer, bus: Arc<EventBus>) -> SseTransport {
    let config = SseConfig {
        url: format!("{}/v1/qbot/chat/sse", server.uri()),
        bot_app_key: "app-key".into(),
        ..SseConfig::default()
    };
    SseTransport::new(&config, bus).unwrap()
}

fn channel_handler(
    transport: &SseTransport,
    event: &str,
) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    transport.on(
        event,
        Arc::new(move |v: Value| {
            let _ = tx.send(v);
        }),
    );
    rx
}

#[tokio::test]
async fn posts_question_and_dispatches_events_by_type() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"type": "config", "payload": {"bot_name": "streamer"}}),
        json!({"type": "reply", "payload": {"record_id": "r1", "content": "hel", "is_final": false}}),
        json!({"type": "reply", "payload": {"record_id": "r1", "content": "hello", "is_final": true}}),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/qbot/chat/sse"))
        .and(body_partial_json(json!({
            "request_id": "q1",
            "content": "hi",
            "bot_app_key": "app-key",
            "visitor_biz_id": "1",
            "session_id": "s1",
            "visitor_labels": []
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server, Arc::new(EventBus::new()));
    let mut replies = channel_handler(&transport, "reply");
    let mut configs = channel_handler(&transport, "config");

    transport.connect().await.unwrap();
    transport
        .send("send", json!({"request_id": "q1", "session_id": "s1", "content": "hi"}))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), replies.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first["content"], "hel");
    assert_eq!(second["content"], "hello");

    let config = configs.recv().await.unwrap();
    assert_eq!(config["bot_name"], "streamer");
}

#[tokio::test]
async fn http_failure_is_published_as_connection_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let bus = Arc::new(EventBus::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe(Topic::Connection, move |env| {
        if let BusEvent::Connection(ConnectionEvent::Error(msg)) = &env.event {
            let _ = tx.send(msg.clone());
        }
    });

    let transport = transport_for(&server, Arc::clone(&bus));
    transport
        .send("send", json!({"request_id": "q1", "session_id": "s1", "content": "hi"}))
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(msg.contains("503"), "got: {msg}");
}

#[tokio::test]
async fn cancel_active_stops_a_slow_stream_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&[json!({"type": "reply", "payload": {"record_id": "r1"}})]))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let transport = transport_for(&server, Arc::new(EventBus::new()));
    let mut replies = channel_handler(&transport, "reply");
    transport
        .send("send", json!({"request_id": "q1", "session_id": "s1", "content": "hi"}))
        .await
        .unwrap();

    assert!(transport.cancel_active());
    assert!(!transport.cancel_active());

    let nothing = tokio::time::timeout(Duration::from_millis(300), replies.recv()).await;
    assert!(nothing.is_err() || nothing.unwrap().is_none());
}

#[tokio::test]
async fn non_question_events_are_not_posted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let transport = transport_for(&server, Arc::new(EventBus::new()));
    transport
        .send("stop_generation", json!({"record_id": "r1"}))
        .await
        .unwrap();
    assert!(!transport.cancel_active());
}
