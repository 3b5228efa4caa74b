// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound handler registry shared by both transports.
//!
//! Handlers are keyed by event name and live independently of any
//! connection, so registrations made before connecting take effect as soon
//! as frames start arriving.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::RwLock;

use qbot_core::InboundHandler;
use qbot_core::wire::unwrap_envelope;
use serde_json::Value;
use tracing::{error, trace};

#[derive(Default)]
pub struct ListenerRegistry {
    handlers: RwLock<HashMap<String, Vec<InboundHandler>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for `event`. Handlers run in registration order.
    pub fn register(&self, event: &str, handler: InboundHandler) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Delivers a payload to every handler of `event`, envelope removed.
    ///
    /// Returns the number of handlers that ran to completion.
    pub fn dispatch(&self, event: &str, payload: Value) -> usize {
        let handlers: Vec<InboundHandler> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!(event, "no handler for inbound event");
            return 0;
        }

        let payload = unwrap_envelope(payload);
        let mut completed = 0;
        for handler in handlers {
            let value = payload.clone();
            match catch_unwind(AssertUnwindSafe(|| handler(value))) {
                Ok(()) => completed += 1,
                Err(_) => error!(event, "inbound handler panicked"),
            }
        }
        completed
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events: Vec<String> = self
            .handlers
            .read()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("ListenerRegistry").field("events", &events).finish()
    }
}
