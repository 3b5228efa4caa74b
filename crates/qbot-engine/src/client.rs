// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client actor: the single owner of the reconciler.
//!
//! Transport callbacks, send-timeout timers and [`ChatHandle`] calls are all
//! turned into [`ClientCommand`]s on one channel, so every transcript
//! mutation happens on the actor task, one command at a time.
//!
//! - Inbound payloads are parsed into wire types here; a payload that fails
//!   to parse is logged and discarded.
//! - Each sent question arms a timer. The timer is aborted as soon as the
//!   question stops being pending.
//! - The actor stops when every handle is dropped or on [`ChatHandle::shutdown`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use qbot_bus::{BusEvent, EventBus};
use qbot_core::wire::{self, events, OutboundQuestion, ReferenceEvent, ServerErrorEvent, StopGeneration};
use qbot_core::{AgentThought, Message, QbotError, TokenStat, Transport, TransportKind};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::engine::{Reconciler, StopTicket};

/// Inbound event names the actor subscribes to on the transport.
const INBOUND_EVENTS: [&str; 5] = [
    events::REPLY,
    events::REFERENCE,
    events::TOKEN_STAT,
    events::THOUGHT,
    events::ERROR,
];

#[derive(Debug)]
pub enum ClientCommand {
    Send {
        content: String,
        reply: oneshot::Sender<Result<Message, QbotError>>,
    },
    Stop {
        reply: oneshot::Sender<Option<StopTicket>>,
    },
    LoadHistory {
        batch: Vec<Message>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Message>>,
    },
    Inbound {
        event: String,
        payload: Value,
    },
    Expire {
        request_id: String,
    },
    SetTransfer {
        active: bool,
        avatar: Option<String>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long a question may wait for its first acknowledgment.
    pub send_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(120),
        }
    }
}

/// Cloneable front door to a running [`ChatClient`].
#[derive(Debug, Clone)]
pub struct ChatHandle {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ChatHandle {
    fn command(&self, command: ClientCommand) -> Result<(), QbotError> {
        self.tx.send(command).map_err(|_| QbotError::Closed)
    }

    /// Sends a question. Resolves once it is in the transcript and handed to the transport.
    pub async fn send(&self, content: impl Into<String>) -> Result<Message, QbotError> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::Send {
            content: content.into(),
            reply,
        })?;
        rx.await.map_err(|_| QbotError::Closed)?
    }

    /// Stops the reply being streamed, if any.
    pub async fn stop(&self) -> Result<Option<StopTicket>, QbotError> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::Stop { reply })?;
        rx.await.map_err(|_| QbotError::Closed)
    }

    pub fn load_history(&self, batch: Vec<Message>) -> Result<(), QbotError> {
        self.command(ClientCommand::LoadHistory { batch })
    }

    pub async fn snapshot(&self) -> Result<Vec<Message>, QbotError> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::Snapshot { reply })?;
        rx.await.map_err(|_| QbotError::Closed)
    }

    pub fn set_transfer(&self, active: bool, avatar: Option<String>) -> Result<(), QbotError> {
        self.command(ClientCommand::SetTransfer { active, avatar })
    }

    /// Delivers an inbound event as if the transport had received it.
    pub fn inject(&self, event: &str, payload: Value) -> Result<(), QbotError> {
        self.command(ClientCommand::Inbound {
            event: event.to_string(),
            payload,
        })
    }

    pub fn shutdown(&self) -> Result<(), QbotError> {
        self.command(ClientCommand::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct ChatClient {
    reconciler: Reconciler,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    options: ClientOptions,
    timers: HashMap<String, AbortHandle>,
    rx: mpsc::UnboundedReceiver<ClientCommand>,
    weak_tx: mpsc::WeakUnboundedSender<ClientCommand>,
}

impl ChatClient {
    /// Registers the transport handlers, connects, and starts the actor task.
    pub fn spawn(
        reconciler: Reconciler,
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        options: ClientOptions,
    ) -> (ChatHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let weak_tx = tx.downgrade();

        for event in INBOUND_EVENTS.into_iter().chain(events::METADATA) {
            let weak = weak_tx.clone();
            let name = event.to_string();
            transport.on(
                event,
                Arc::new(move |payload: Value| {
                    let Some(tx) = weak.upgrade() else {
                        return;
                    };
                    let _ = tx.send(ClientCommand::Inbound {
                        event: name.clone(),
                        payload,
                    });
                }),
            );
        }

        let client = ChatClient {
            reconciler,
            transport,
            bus,
            options,
            timers: HashMap::new(),
            rx,
            weak_tx,
        };
        let task = tokio::spawn(client.run());
        (ChatHandle { tx }, task)
    }

    async fn run(mut self) {
        if let Err(e) = self.transport.connect().await {
            warn!(error = %e, "transport connect failed");
        }
        info!(transport = %self.transport.kind(), "chat client started");

        while let Some(command) = self.rx.recv().await {
            if matches!(command, ClientCommand::Shutdown) {
                break;
            }
            self.handle(command).await;
            self.prune_timers();
        }

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "transport disconnect failed");
        }
        info!("chat client stopped");
    }

    async fn handle(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Send { content, reply } => {
                let result = self.send(&content).await;
                let _ = reply.send(result);
            }
            ClientCommand::Stop { reply } => {
                let ticket = self.stop().await;
                let _ = reply.send(ticket);
            }
            ClientCommand::LoadHistory { batch } => self.reconciler.merge_history(batch),
            ClientCommand::Snapshot { reply } => {
                let _ = reply.send(self.reconciler.snapshot());
            }
            ClientCommand::Inbound { event, payload } => self.inbound(&event, payload),
            ClientCommand::Expire { request_id } => {
                self.timers.remove(&request_id);
                self.reconciler.expire(&request_id);
            }
            ClientCommand::SetTransfer { active, avatar } => {
                self.reconciler.set_transfer(active, avatar)
            }
            ClientCommand::Shutdown => {}
        }
    }

    async fn send(&mut self, content: &str) -> Result<Message, QbotError> {
        let question = self.reconciler.ask(content);
        let request_id = question.request_id.clone().unwrap_or_default();
        self.arm_timeout(&request_id);

        let outbound = OutboundQuestion {
            request_id,
            session_id: self.reconciler.session().session_id().to_string(),
            content: content.to_string(),
        };
        let payload = serde_json::to_value(&outbound)
            .map_err(|e| QbotError::malformed("outbound question", e))?;
        self.transport.send(events::SEND, payload).await?;
        Ok(question)
    }

    fn arm_timeout(&mut self, request_id: &str) {
        let Some(tx) = self.weak_tx.upgrade() else {
            return;
        };
        let timeout = self.options.send_timeout;
        let id = request_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(ClientCommand::Expire { request_id: id });
        });
        self.timers.insert(request_id.to_string(), timer.abort_handle());
    }

    /// Aborts timers whose question is no longer pending.
    fn prune_timers(&mut self) {
        let reconciler = &self.reconciler;
        self.timers.retain(|request_id, timer| {
            let keep = reconciler.is_pending(request_id);
            if !keep {
                timer.abort();
            }
            keep
        });
    }

    async fn stop(&mut self) -> Option<StopTicket> {
        let ticket = self.reconciler.stop()?;
        match self.transport.kind() {
            TransportKind::EventStream => {
                if !self.transport.cancel_active() {
                    debug!("no active stream to cancel");
                }
            }
            TransportKind::Socket => {
                let body = StopGeneration {
                    record_id: ticket.record_id.clone(),
                };
                match serde_json::to_value(&body) {
                    Ok(payload) => {
                        if let Err(e) = self.transport.send(events::STOP_GENERATION, payload).await {
                            warn!(error = %e, "failed to send stop request");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode stop request"),
                }
            }
        }
        Some(ticket)
    }

    fn inbound(&mut self, event: &str, payload: Value) {
        match event {
            events::REPLY => {
                if let Some(reply) = parse::<Message>(event, payload) {
                    self.reconciler.apply_reply(reply);
                }
            }
            events::REFERENCE => {
                if let Some(refs) = parse::<ReferenceEvent>(event, payload) {
                    self.reconciler.apply_references(refs);
                }
            }
            events::TOKEN_STAT => {
                if let Some(stat) = parse::<TokenStat>(event, payload) {
                    self.reconciler.apply_token_stat(stat);
                }
            }
            events::THOUGHT => {
                if let Some(trace) = parse::<AgentThought>(event, payload) {
                    self.reconciler.apply_thought(trace);
                }
            }
            events::ERROR => {
                let message = parse::<ServerErrorEvent>(event, payload)
                    .map(|e| e.describe())
                    .unwrap_or_else(|| "service error".to_string());
                warn!(%message, "backend reported an error");
                self.bus.publish(BusEvent::ServerError(message));
            }
            other if events::METADATA.contains(&other) => {
                self.reconciler.apply_metadata(&payload);
            }
            other => debug!(event = other, "unhandled inbound event"),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(event: &str, payload: Value) -> Option<T> {
    match wire::parse::<T>(event, payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(event, error = %e, "discarding malformed inbound payload");
            None
        }
    }
}
