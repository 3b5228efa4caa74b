// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transports connecting the qbot client to the bot backend.
//!
//! Two implementations of [`qbot_core::Transport`]:
//! - [`SocketTransport`]: a persistent Socket.IO connection, gated on an
//!   access token and reconnected with backoff.
//! - [`SseTransport`]: one server-sent-event stream per question, with a
//!   cancellable in-flight stream.
//!
//! Both dispatch inbound payloads through a [`ListenerRegistry`] and
//! report lifecycle changes on the event bus.

pub mod registry;
pub mod socket;
pub mod socketio;
pub mod sse;
pub mod token;

use std::sync::Arc;

use qbot_bus::EventBus;
use qbot_config::QbotConfig;
use qbot_core::{QbotError, Transport, TransportKind};

pub use registry::ListenerRegistry;
pub use socket::SocketTransport;
pub use sse::SseTransport;
pub use token::{TokenCell, TokenClient};

/// Builds the transport selected by `client.access`.
pub fn from_config(
    config: &QbotConfig,
    token: TokenCell,
    bus: Arc<EventBus>,
) -> Result<Arc<dyn Transport>, QbotError> {
    Ok(match config.client.access {
        TransportKind::Socket => Arc::new(SocketTransport::new(&config.socket, token, bus)),
        TransportKind::EventStream => Arc::new(SseTransport::new(&config.sse, bus)?),
    })
}
