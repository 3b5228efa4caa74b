// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ordered conversation and its merge rules.
//!
//! Entries are identified by `record_id` once the server has assigned one,
//! and by `request_id` before that. Ordering is by timestamp, with newly
//! streamed replies placed directly after the entry they follow.

use std::collections::HashMap;

use qbot_core::Message;

/// What the first acknowledgment of a question needs to know.
#[derive(Debug, Clone, Copy)]
pub struct AckContext<'a> {
    /// Avatar shown on the placeholder row.
    pub bot_avatar: &'a str,
    /// No placeholder is added while a human agent has the conversation.
    pub transfer_active: bool,
}

/// Replaces `existing` with `incoming`, keeping what the update does not carry.
///
/// Hand-off flags are sticky once set. References, the thought trace, token
/// usage and the sender avatar survive an update that omits them.
pub fn carry_forward(existing: &Message, incoming: Message) -> Message {
    let mut merged = incoming;
    merged.transfer = existing.transfer.or(merged.transfer);
    merged.quit = existing.quit.or(merged.quit);
    merged.transfer_robot = existing.transfer_robot.or(merged.transfer_robot);
    if merged.references.is_empty() {
        merged.references = existing.references.clone();
    }
    if merged.agent_thought.is_none() {
        merged.agent_thought = existing.agent_thought.clone();
    }
    if merged.token_usage.is_none() {
        merged.token_usage = existing.token_usage.clone();
    }
    if merged.from_avatar.is_none() {
        merged.from_avatar = existing.from_avatar.clone();
    }
    merged
}

/// Row shown between an acknowledged question and the first reply chunk.
pub fn placeholder(after: &Message, bot_avatar: &str) -> Message {
    Message {
        session_id: after.session_id.clone(),
        timestamp: after.timestamp,
        is_final: true,
        is_placeholder: true,
        from_avatar: Some(bot_avatar.to_string()),
        ..Message::default()
    }
}

/// Ordered transcript entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    entries: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.entries.get_mut(index)
    }

    pub fn push(&mut self, message: Message) {
        self.entries.push(message);
    }

    pub fn find_by_record(&self, record_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.record() == Some(record_id))
    }

    /// Locally sent entry for a request id.
    pub fn find_own_request(&self, request_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.is_from_self && e.request() == Some(request_id))
    }

    /// First entry still streaming.
    pub fn first_streaming(&self) -> Option<usize> {
        self.entries.iter().position(Message::is_streaming)
    }

    pub fn position<P>(&self, predicate: P) -> Option<usize>
    where
        P: FnMut(&Message) -> bool,
    {
        self.entries.iter().position(predicate)
    }

    /// Merges a streamed reply or an acknowledgment.
    ///
    /// An entry with the same identity is updated in place. Otherwise the
    /// message is placed by timestamp, scanning from the newest entry.
    pub fn merge_answer(&mut self, incoming: Message, ack: &AckContext<'_>) {
        if self.entries.is_empty() {
            self.entries.push(incoming);
            return;
        }

        let identity = self.entries.iter().rposition(|e| {
            e.same_record(&incoming)
                || (incoming.is_from_self
                    && e.is_from_self
                    && matches!((e.request(), incoming.request()), (Some(a), Some(b)) if a == b))
        });
        if let Some(i) = identity {
            let existing = &self.entries[i];
            if existing.same_record(&incoming) {
                self.entries[i] = carry_forward(existing, incoming);
                return;
            }
            let first_ack = existing.is_loading;
            let wants_placeholder = first_ack && !incoming.is_evil && !ack.transfer_active;
            let row = wants_placeholder.then(|| placeholder(existing, ack.bot_avatar));
            let mut merged = carry_forward(existing, incoming);
            merged.is_loading = false;
            self.entries[i] = merged;
            if let Some(row) = row {
                self.entries.insert(i + 1, row);
            }
            return;
        }

        for i in (0..self.entries.len()).rev() {
            let existing = &self.entries[i];
            if incoming.timestamp >= existing.timestamp {
                if existing.is_placeholder {
                    self.entries[i] = incoming;
                } else {
                    self.entries.insert(i + 1, incoming);
                }
                return;
            }
            if i == 0 {
                self.entries.insert(0, incoming);
                return;
            }
        }
    }

    /// Merges a batch of older entries, e.g. from a history request.
    pub fn merge_history(&mut self, batch: Vec<Message>) {
        let batch: Vec<Message> = batch
            .into_iter()
            .map(|mut m| {
                m.is_history = true;
                m.is_final = true;
                m
            })
            .collect();

        if batch.is_empty() {
            return;
        }
        if self.entries.is_empty() {
            self.entries = batch;
            return;
        }

        let newest_in_batch = batch.iter().map(|m| m.timestamp).max().unwrap_or(i64::MIN);
        if newest_in_batch < self.entries[0].timestamp {
            let mut merged = batch;
            merged.append(&mut self.entries);
            self.entries = merged;
            return;
        }

        for message in batch.into_iter().rev() {
            let slot = self
                .entries
                .iter()
                .position(|e| e.same_record(&message) || message.timestamp <= e.timestamp);
            match slot {
                Some(i) if self.entries[i].same_record(&message) => self.entries[i] = message,
                Some(i) => self.entries.insert(i, message),
                None => self.entries.push(message),
            }
        }
    }

    /// Collapses entries sharing a record id.
    ///
    /// The first position wins; its content is taken from a later duplicate
    /// only when that duplicate is strictly older.
    pub fn dedup(&mut self) {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<Message> = Vec::with_capacity(self.entries.len());
        for message in self.entries.drain(..) {
            let Some(key) = message.record().map(str::to_owned) else {
                kept.push(message);
                continue;
            };
            match seen.get(&key) {
                Some(&at) => {
                    if message.timestamp < kept[at].timestamp {
                        kept[at] = message;
                    }
                }
                None => {
                    seen.insert(key, kept.len());
                    kept.push(message);
                }
            }
        }
        self.entries = kept;
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.entries.clone()
    }
}
