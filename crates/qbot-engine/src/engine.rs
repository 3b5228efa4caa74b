// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciliation of inbound events into the transcript.
//!
//! [`Reconciler`] has one entry point per event kind. Every entry point that
//! changes the transcript finishes the same way: entries sharing a record id
//! are collapsed, then a [`TranscriptChange`] carrying a full snapshot is
//! published on the bus.
//!
//! The reconciler is not thread-safe by itself; the client actor owns it and
//! applies events one at a time in delivery order.

use std::collections::HashSet;
use std::sync::Arc;

use qbot_bus::{BusEvent, EventBus, TranscriptChange};
use qbot_config::model::ClientConfig;
use qbot_config::StreamingPattern;
use qbot_core::wire::ReferenceEvent;
use qbot_core::{AgentThought, Message, MessageKind, TokenStat};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::citation;
use crate::session::SessionStore;
use crate::thought;
use crate::transcript::{AckContext, Transcript};

/// Status line on a placeholder until a procedure title arrives.
pub const DEFAULT_LOADING_TEXT: &str = "思考中";

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Appended to a reply cut short by the user.
    pub stop_marker: String,
    pub streaming_pattern: StreamingPattern,
}

impl From<&ClientConfig> for ReconcilerOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            stop_marker: config.stop_marker.clone(),
            streaming_pattern: config.streaming_pattern,
        }
    }
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// What the caller must do after a successful [`Reconciler::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopTicket {
    /// Record of the reply that was stopped, if the server had assigned one.
    pub record_id: Option<String>,
}

pub struct Reconciler {
    transcript: Transcript,
    pending: HashSet<String>,
    session: SessionStore,
    bus: Arc<EventBus>,
    options: ReconcilerOptions,
}

impl Reconciler {
    pub fn new(session: SessionStore, bus: Arc<EventBus>, options: ReconcilerOptions) -> Self {
        Self {
            transcript: Transcript::new(),
            pending: HashSet::new(),
            session,
            bus,
            options,
        }
    }

    /// Appends a locally sent question and marks its request pending.
    ///
    /// The caller arms the failure timer for the returned request id.
    pub fn ask(&mut self, content: &str) -> Message {
        let request_id = uuid::Uuid::new_v4().to_string();
        let message = Message {
            request_id: Some(request_id.clone()),
            session_id: Some(self.session.session_id().to_string()),
            content: content.to_string(),
            is_from_self: true,
            is_final: true,
            is_loading: true,
            timestamp: chrono::Utc::now().timestamp_millis(),
            ..Message::default()
        };
        self.pending.insert(request_id.clone());
        self.transcript.push(message.clone());
        debug!(request_id = %request_id, "question queued");
        self.publish(MessageKind::Question);
        message
    }

    fn answer(&mut self, message: Message) {
        if let Some(request_id) = message.request() {
            self.pending.remove(request_id);
        }
        let transfer = self.session.transfer();
        let bot_avatar = self.session.config().avatar.clone();
        let ack = AckContext {
            bot_avatar: &bot_avatar,
            transfer_active: transfer.active,
        };
        self.transcript.merge_answer(message, &ack);
    }

    /// Runs the answer merge and publishes the result.
    pub fn merge_answer(&mut self, message: Message) {
        self.answer(message);
        self.publish(MessageKind::Answer);
    }

    /// Applies a streamed reply chunk.
    ///
    /// Returns `false` when the reply was dropped: it belongs to another
    /// session, or its record has already finished.
    pub fn apply_reply(&mut self, mut reply: Message) -> bool {
        if !self.session.is_current(reply.session_id.as_deref()) {
            debug!(session_id = ?reply.session_id, "reply for another session, dropped");
            return false;
        }
        let existing = reply.record().and_then(|r| self.transcript.find_by_record(r));
        if let Some(i) = existing {
            let entry = &self.transcript.entries()[i];
            if entry.is_final && !entry.is_placeholder {
                debug!(record_id = ?reply.record_id, "reply for finished record, dropped");
                return false;
            }
        }

        if !reply.quote_infos.is_empty() {
            let known = match existing {
                Some(i) if reply.references.is_empty() => {
                    self.transcript.entries()[i].references.clone()
                }
                _ => reply.references.clone(),
            };
            reply.content = citation::inline(&reply.content, &reply.quote_infos, &known);
        }

        self.merge_answer(reply);
        true
    }

    /// Replaces the references of an existing record, hiding internal ones.
    pub fn apply_references(&mut self, event: ReferenceEvent) -> bool {
        let Some(i) = event
            .record_id
            .as_deref()
            .and_then(|r| self.transcript.find_by_record(r))
        else {
            debug!(record_id = ?event.record_id, "references for unknown record, dropped");
            return false;
        };
        let visible = event.references.into_iter().filter(|r| r.is_visible()).collect();
        if let Some(entry) = self.transcript.get_mut(i) {
            entry.references = visible;
        }
        self.publish(MessageKind::Reference);
        true
    }

    /// Attaches token statistics to the reply they describe.
    ///
    /// The raw statistics are always republished, even for another session.
    pub fn apply_token_stat(&mut self, stat: TokenStat) -> bool {
        self.bus.publish(BusEvent::TokenStat(stat.clone()));
        if !self.session.is_current(stat.session_id.as_deref()) {
            debug!(session_id = ?stat.session_id, "token stat for another session, dropped");
            return false;
        }

        let record = stat.record_id.clone().filter(|r| !r.is_empty());
        let matching_placeholder = record.as_deref().and_then(|r| {
            self.transcript
                .position(|e| e.is_placeholder && e.record() == Some(r))
        });
        let attached_record = record.as_deref().and_then(|r| self.transcript.find_by_record(r));

        let target = match (matching_placeholder, attached_record) {
            (Some(i), _) => Some(i),
            (None, Some(_)) => None,
            (None, None) => self
                .transcript
                .position(|e| e.is_placeholder && e.record().is_none()),
        };

        if let Some(i) = target {
            let loading_text = stat.latest_title().unwrap_or(DEFAULT_LOADING_TEXT).to_string();
            let other_streaming = self
                .transcript
                .entries()
                .iter()
                .enumerate()
                .any(|(j, e)| j != i && e.is_streaming());
            let standard = self.options.streaming_pattern == StreamingPattern::Standard;
            if let Some(entry) = self.transcript.get_mut(i) {
                if record.is_some() {
                    entry.record_id = record;
                }
                entry.loading_text = Some(loading_text);
                entry.token_usage = Some(stat);
                if standard && !other_streaming {
                    entry.is_final = false;
                }
            }
        } else if let Some(i) = attached_record {
            if let Some(entry) = self.transcript.get_mut(i) {
                entry.token_usage = Some(stat);
            }
        } else {
            debug!(record_id = ?stat.record_id, "token stat without a target, dropped");
            return false;
        }

        self.publish(MessageKind::Answer);
        true
    }

    /// Stores a prepared thought trace on its record.
    pub fn apply_thought(&mut self, mut trace: AgentThought) -> bool {
        if !self.session.is_current(trace.session_id.as_deref()) {
            debug!(session_id = ?trace.session_id, "thought for another session, dropped");
            return false;
        }
        let Some(i) = trace
            .record_id
            .as_deref()
            .filter(|r| !r.is_empty())
            .and_then(|r| self.transcript.find_by_record(r))
        else {
            debug!(record_id = ?trace.record_id, "thought for unknown record, dropped");
            return false;
        };
        thought::prepare(&mut trace.procedures);
        if let Some(entry) = self.transcript.get_mut(i) {
            entry.agent_thought = Some(trace);
        }
        self.publish(MessageKind::Answer);
        true
    }

    /// Merges a batch of past messages.
    pub fn merge_history(&mut self, batch: Vec<Message>) {
        debug!(count = batch.len(), "merging history");
        self.transcript.merge_history(batch);
        self.publish(MessageKind::History);
    }

    /// Finalizes the reply being streamed.
    ///
    /// Returns `None`, publishing nothing, when no reply is streaming.
    pub fn stop(&mut self) -> Option<StopTicket> {
        let i = self.transcript.first_streaming()?;
        let marker = self.options.stop_marker.clone();
        let entry = self.transcript.get_mut(i)?;
        entry.is_final = true;
        // A stopped placeholder is a finished reply; late chunks must not reopen it.
        entry.is_placeholder = false;
        entry.content.push_str(&marker);
        let ticket = StopTicket {
            record_id: entry.record_id.clone(),
        };
        info!(record_id = ?ticket.record_id, "generation stopped");
        self.publish(MessageKind::Stop);
        Some(ticket)
    }

    /// Marks a question as failed if it was never acknowledged.
    ///
    /// Returns `true` only the first time for a still-pending request.
    pub fn expire(&mut self, request_id: &str) -> bool {
        if !self.pending.remove(request_id) {
            return false;
        }
        warn!(request_id, "no acknowledgment before timeout, marking failed");
        if let Some(i) = self.transcript.find_own_request(request_id)
            && let Some(entry) = self.transcript.get_mut(i)
        {
            entry.failed = true;
            entry.is_loading = false;
        }
        self.publish(MessageKind::Answer);
        true
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Applies a metadata push (`config`, `init`, `session`, `bot_info`).
    pub fn apply_metadata(&mut self, payload: &Value) -> bool {
        self.session.apply_update(payload)
    }

    pub fn set_transfer(&mut self, active: bool, avatar: Option<String>) {
        self.session.set_transfer(active, avatar);
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.transcript.to_vec()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionStore {
        &mut self.session
    }

    fn publish(&mut self, kind: MessageKind) {
        self.transcript.dedup();
        self.bus.publish(BusEvent::TranscriptChanged(TranscriptChange {
            transcript: self.transcript.to_vec(),
            kind,
        }));
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("entries", &self.transcript.len())
            .field("pending", &self.pending.len())
            .field("session", &self.session.session_id())
            .finish()
    }
}
