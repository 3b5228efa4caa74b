// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event types carried on the bus.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{Display, EnumDiscriminants, EnumString, IntoStaticStr};

use qbot_core::{BotConfig, Message, MessageKind, TokenStat};

/// Every event published on the bus.
///
/// The discriminant doubles as the subscription [`Topic`].
#[derive(Debug, Clone, EnumDiscriminants)]
#[strum_discriminants(name(Topic), derive(Hash, Display, EnumString))]
pub enum BusEvent {
    /// Transport lifecycle.
    Connection(ConnectionEvent),
    /// Bot/session metadata changed.
    ConfigChanged(BotConfig),
    /// The transcript changed; carries a full snapshot.
    TranscriptChanged(TranscriptChange),
    /// Raw token-usage statistics as received.
    TokenStat(TokenStat),
    /// The backend reported an error.
    ServerError(String),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        Topic::from(self)
    }
}

/// Transport lifecycle events, re-exposed under fixed names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, IntoStaticStr)]
pub enum ConnectionEvent {
    #[strum(serialize = "connect")]
    Connect,
    #[strum(serialize = "connectError")]
    ConnectError(String),
    #[strum(serialize = "error")]
    Error(String),
    #[strum(serialize = "disconnect")]
    Disconnect(String),
    #[strum(serialize = "reconnect")]
    Reconnect { attempts: u32 },
    #[strum(serialize = "reconnectAttempt")]
    ReconnectAttempt { attempt: u32 },
    #[strum(serialize = "reconnectError")]
    ReconnectError(String),
    #[strum(serialize = "reconnectFailed")]
    ReconnectFailed,
}

impl ConnectionEvent {
    /// The fixed event name presentation code listens for.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Snapshot of the transcript after one reconciliation step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptChange {
    pub transcript: Vec<Message>,
    pub kind: MessageKind,
}

/// An event together with its delivery metadata.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: uuid::Uuid,
    pub published_at: DateTime<Utc>,
    pub event: BusEvent,
}

impl Envelope {
    pub fn new(event: BusEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            published_at: Utc::now(),
            event,
        }
    }
}
