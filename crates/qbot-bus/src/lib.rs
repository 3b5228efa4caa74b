// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide publish/subscribe registry for the qbot chat client.
//!
//! Decouples the transports and the reconciliation engine from whatever
//! renders the transcript. Delivery is synchronous, in subscription order,
//! on the publishing thread. Each handler call is isolated: a handler that
//! panics is logged and the remaining handlers still run.
//!
//! Async consumers can additionally take a [`stream`](EventBus::stream) of
//! every published envelope.

pub mod events;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

pub use events::{BusEvent, ConnectionEvent, Envelope, Topic, TranscriptChange};

/// Subscriber count per topic above which a warning is logged.
pub const SOFT_SUBSCRIBER_LIMIT: usize = 100;

/// Capacity of the broadcast channel behind [`EventBus::stream`].
const STREAM_CAPACITY: usize = 256;

/// A bus event handler.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    topic: Topic,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

struct Subscriber {
    id: u64,
    owner: Option<String>,
    handler: Handler,
}

/// Typed event bus.
pub struct EventBus {
    subscribers: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    next_id: AtomicU64,
    stream_tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (stream_tx, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stream_tx,
        }
    }

    /// Registers an anonymous handler for a topic.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.insert(None, topic, Arc::new(handler))
    }

    /// Registers a handler owned by `owner`, removable with [`unsubscribe_all`](Self::unsubscribe_all).
    pub fn subscribe_owned<F>(&self, owner: &str, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.insert(Some(owner.to_string()), topic, Arc::new(handler))
    }

    fn insert(&self, owner: Option<String>, topic: Topic, handler: Handler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let list = subscribers.entry(topic).or_default();
        list.push(Subscriber { id, owner, handler });
        if list.len() > SOFT_SUBSCRIBER_LIMIT {
            warn!(
                topic = %topic,
                count = list.len(),
                "subscriber count above soft limit, possible listener leak"
            );
        }
        Subscription { id, topic }
    }

    /// Removes a single subscription. Returns whether it was present.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(list) = subscribers.get_mut(&subscription.topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != subscription.id);
        before != list.len()
    }

    /// Removes every handler registered by `owner`, on all topics.
    ///
    /// Returns the number of handlers removed.
    pub fn unsubscribe_all(&self, owner: &str) -> usize {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut removed = 0;
        for list in subscribers.values_mut() {
            let before = list.len();
            list.retain(|s| s.owner.as_deref() != Some(owner));
            removed += before - list.len();
        }
        debug!(owner, removed, "removed owner subscriptions");
        removed
    }

    /// Number of handlers currently registered for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Publishes an event to every handler of its topic, then to stream receivers.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: BusEvent) -> usize {
        let envelope = Envelope::new(event);
        let topic = envelope.event.topic();

        // Handlers run without the lock held so they may subscribe or publish.
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&topic)
            .map(|list| list.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&envelope))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(topic = %topic, %reason, "bus handler panicked, continuing delivery");
                }
            }
        }

        // No receivers is the common case and not an error.
        let _ = self.stream_tx.send(envelope);
        delivered
    }

    /// Returns a receiver of every envelope published from now on.
    pub fn stream(&self) -> broadcast::Receiver<Envelope> {
        self.stream_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count: usize = self
            .subscribers
            .read()
            .map(|s| s.values().map(Vec::len).sum())
            .unwrap_or(0);
        f.debug_struct("EventBus").field("subscribers", &count).finish()
    }
}
