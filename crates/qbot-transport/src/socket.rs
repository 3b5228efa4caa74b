// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent-socket transport.
//!
//! A background task waits for the access token, opens a WebSocket, runs
//! the Socket.IO handshake and then pumps frames in both directions until
//! the connection drops. Drops are followed by reconnection with a doubling
//! delay. Every lifecycle change is published on the bus as a
//! [`ConnectionEvent`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use qbot_bus::{BusEvent, ConnectionEvent, EventBus};
use qbot_config::model::SocketConfig;
use qbot_core::wire::wrap_envelope;
use qbot_core::{InboundHandler, QbotError, Transport, TransportKind};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::ListenerRegistry;
use crate::socketio::{Packet, handshake_url};
use crate::token::TokenCell;

/// How long [`SocketTransport::disconnect`] waits for the task to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Why an established session ended.
enum Ended {
    Cancelled,
    Closed(String),
}

struct Shared {
    config: SocketConfig,
    token: TokenCell,
    bus: Arc<EventBus>,
    registry: ListenerRegistry,
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn publish(&self, event: ConnectionEvent) {
        self.bus.publish(BusEvent::Connection(event));
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<String>>) {
        self.connected.store(tx.is_some(), Ordering::SeqCst);
        *self
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tx;
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Socket.IO client over `tokio-tungstenite`.
pub struct SocketTransport {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl SocketTransport {
    pub fn new(config: &SocketConfig, token: TokenCell, bus: Arc<EventBus>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: config.clone(),
                token,
                bus,
                registry: ListenerRegistry::new(),
                connected: AtomicBool::new(false),
                outbound: Mutex::new(None),
            }),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&self) -> Result<(), QbotError> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!("socket task already running");
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&self.shared), cancel.clone()));
        *running = Some(Running { cancel, task });
        Ok(())
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), QbotError> {
        let frame = Packet::event(event, wrap_envelope(payload)).encode();
        let outbound = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match outbound {
            Some(tx) if self.is_connected() => {
                if tx.send(frame).is_err() {
                    warn!(event, "socket closed while sending, event dropped");
                } else {
                    debug!(event, "event queued on socket");
                }
            }
            _ => warn!(event, "socket not connected, event dropped"),
        }
        Ok(())
    }

    fn on(&self, event: &str, handler: InboundHandler) {
        self.shared.registry.register(event, handler);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), QbotError> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(Running { cancel, task }) = running {
            cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("socket task did not stop within grace period");
            }
        }
        self.shared.set_outbound(None);
        Ok(())
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock()
            && let Some(r) = running.take()
        {
            r.cancel.cancel();
        }
    }
}

/// Delay before reconnection attempt `attempt` (1-based).
pub fn backoff_delay(config: &SocketConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = config
        .reconnect_delay_ms
        .saturating_mul(1u64 << exp)
        .min(config.reconnect_delay_max_ms);
    Duration::from_millis(ms)
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    debug!("waiting for access token");
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = shared.token.wait() => {}
    }

    let limit = shared.config.reconnect_attempts;
    let mut attempt: u32 = 0;
    let mut retrying = false;
    loop {
        if retrying {
            attempt += 1;
            if limit != 0 && attempt > limit {
                warn!(attempts = limit, "giving up on socket reconnection");
                shared.publish(ConnectionEvent::ReconnectFailed);
                break;
            }
            shared.publish(ConnectionEvent::ReconnectAttempt { attempt });
            let delay = backoff_delay(&shared.config, attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        retrying = true;

        // Re-read on every attempt: the token may have been refreshed.
        let token = shared.token.get().unwrap_or_default();
        match session(&shared, &token, &cancel, attempt).await {
            Ok(Ended::Cancelled) => break,
            Ok(Ended::Closed(reason)) => {
                info!(%reason, "socket disconnected");
                attempt = 0;
                shared.publish(ConnectionEvent::Disconnect(reason));
            }
            Err(e) => {
                warn!(error = %e, attempt, "socket connection failed");
                if attempt == 0 {
                    shared.publish(ConnectionEvent::ConnectError(e.to_string()));
                } else {
                    shared.publish(ConnectionEvent::ReconnectError(e.to_string()));
                }
            }
        }
    }
    shared.set_outbound(None);
}

fn transport_err(context: &str, e: tungstenite::Error) -> QbotError {
    QbotError::Transport {
        message: format!("{context}: {e}"),
        source: Some(Box::new(e)),
    }
}

async fn next_packet<S>(read: &mut S) -> Result<Packet, QbotError>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    loop {
        match read.next().await {
            None => {
                return Err(QbotError::Transport {
                    message: "socket closed during handshake".into(),
                    source: None,
                });
            }
            Some(Err(e)) => return Err(transport_err("handshake read failed", e)),
            Some(Ok(WsMessage::Text(text))) => return Packet::decode(text.as_str()),
            Some(Ok(WsMessage::Close(_))) => {
                return Err(QbotError::Transport {
                    message: "server closed socket during handshake".into(),
                    source: None,
                });
            }
            Some(Ok(_)) => continue,
        }
    }
}

/// Runs one connection from handshake to close.
///
/// Errors before the namespace is joined are returned; anything after
/// that ends the session with [`Ended::Closed`].
async fn session(
    shared: &Shared,
    token: &str,
    cancel: &CancellationToken,
    attempt: u32,
) -> Result<Ended, QbotError> {
    let url = handshake_url(&shared.config.url, &shared.config.path);
    debug!(%url, "opening socket");
    let (ws, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(Ended::Cancelled),
        result = connect_async(url.as_str()) => result.map_err(|e| transport_err("connect failed", e))?,
    };
    let (mut write, mut read) = ws.split();

    let first = tokio::select! {
        _ = cancel.cancelled() => return Ok(Ended::Cancelled),
        packet = next_packet(&mut read) => packet?,
    };
    let open = match first {
        Packet::Open(info) => info,
        other => {
            return Err(QbotError::Protocol {
                message: format!("expected open packet, got {other:?}"),
                source: None,
            });
        }
    };

    let auth = Packet::Connect(Some(serde_json::json!({ "token": token })));
    write
        .send(WsMessage::text(auth.encode()))
        .await
        .map_err(|e| transport_err("namespace connect failed", e))?;

    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => return Ok(Ended::Cancelled),
            packet = next_packet(&mut read) => packet?,
        };
        match packet {
            Packet::Connect(_) => break,
            Packet::Ping => write
                .send(WsMessage::text(Packet::Pong.encode()))
                .await
                .map_err(|e| transport_err("pong failed", e))?,
            Packet::ConnectError(data) => {
                return Err(QbotError::Transport {
                    message: format!("namespace connect rejected: {data}"),
                    source: None,
                });
            }
            _ => continue,
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    shared.set_outbound(Some(tx));
    info!(sid = %open.sid, "socket connected");
    shared.publish(ConnectionEvent::Connect);
    if attempt > 0 {
        shared.publish(ConnectionEvent::Reconnect { attempts: attempt });
    }

    let ended = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(WsMessage::text(Packet::Disconnect.encode())).await;
                let _ = write.close().await;
                break Ended::Cancelled;
            }
            Some(frame) = rx.recv() => {
                if let Err(e) = write.send(WsMessage::text(frame)).await {
                    break Ended::Closed(format!("write failed: {e}"));
                }
            }
            incoming = read.next() => match incoming {
                None | Some(Ok(WsMessage::Close(_))) => break Ended::Closed("transport close".into()),
                Some(Err(e)) => break Ended::Closed(format!("transport error: {e}")),
                Some(Ok(WsMessage::Text(text))) => match Packet::decode(text.as_str()) {
                    Ok(Packet::Ping) => {
                        if let Err(e) = write.send(WsMessage::text(Packet::Pong.encode())).await {
                            break Ended::Closed(format!("write failed: {e}"));
                        }
                    }
                    Ok(Packet::Event { name, data }) => {
                        debug!(event = %name, "inbound event");
                        shared.registry.dispatch(&name, data);
                    }
                    Ok(Packet::Disconnect) => break Ended::Closed("io server disconnect".into()),
                    Ok(Packet::Close) => break Ended::Closed("transport close".into()),
                    Ok(Packet::ConnectError(data)) => {
                        shared.publish(ConnectionEvent::Error(data.to_string()));
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "discarding undecodable frame"),
                },
                Some(Ok(_)) => {}
            }
        }
    };

    shared.set_outbound(None);
    Ok(ended)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(delay: u64, max: u64) -> SocketConfig {
        SocketConfig {
            reconnect_delay_ms: delay,
            reconnect_delay_max_ms: max,
            ..SocketConfig::default()
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let c = config(1000, 5000);
        assert_eq!(backoff_delay(&c, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&c, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&c, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&c, 4), Duration::from_millis(5000));
        assert_eq!(backoff_delay(&c, 60), Duration::from_millis(5000));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn send_while_disconnected_is_dropped() {
        let transport = SocketTransport::new(
            &SocketConfig::default(),
            TokenCell::new(),
            Arc::new(EventBus::new()),
        );
        assert!(!transport.is_connected());
        transport
            .send("send", serde_json::json!({"content": "hi"}))
            .await
            .unwrap();
        assert!(logs_contain("socket not connected, event dropped"));
    }

    #[tokio::test]
    async fn idle_without_token_and_disconnects_cleanly() {
        let transport = SocketTransport::new(
            &SocketConfig::default(),
            TokenCell::new(),
            Arc::new(EventBus::new()),
        );
        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert!(!transport.is_connected());
        transport.disconnect().await.unwrap();
        assert!(transport.running.lock().unwrap().is_none());
    }
}
