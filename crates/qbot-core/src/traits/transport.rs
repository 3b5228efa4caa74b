// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport trait shared by the persistent-socket and event-stream adapters.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::QbotError;

/// Callback invoked with an inbound payload, envelope already removed.
pub type InboundHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Which wire protocol a transport speaks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum TransportKind {
    /// Persistent bidirectional socket.
    #[serde(rename = "ws")]
    #[strum(serialize = "ws")]
    Socket,
    /// One server-sent-event stream per outbound message.
    #[serde(rename = "sse")]
    #[strum(serialize = "sse")]
    EventStream,
}

/// Connection to the bot backend.
///
/// Connection failures are reported on the event bus rather than returned;
/// callers decide whether to retry. Handlers registered with [`on`](Transport::on)
/// before a connection exists are attached once it opens.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Returns the wire protocol of this transport.
    fn kind(&self) -> TransportKind;

    /// Starts connecting. Returns once the connection attempt is underway.
    async fn connect(&self) -> Result<(), QbotError>;

    /// Sends an event. A send while disconnected is dropped and logged.
    async fn send(&self, event: &str, payload: serde_json::Value) -> Result<(), QbotError>;

    /// Registers a handler for an inbound event name.
    fn on(&self, event: &str, handler: InboundHandler);

    /// Whether outbound sends will currently be delivered.
    fn is_connected(&self) -> bool;

    /// Closes the connection and stops any reconnection.
    async fn disconnect(&self) -> Result<(), QbotError>;

    /// Cancels the in-flight response stream, if the transport has one.
    ///
    /// Returns `true` when a live stream was cancelled.
    fn cancel_active(&self) -> bool {
        false
    }
}
