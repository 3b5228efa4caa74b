// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns bus events into terminal lines.
//!
//! The terminal is append-only, so the renderer remembers what it has
//! already printed and only emits what is new in each transcript snapshot.

use std::collections::{HashMap, HashSet};

use colored::Colorize;
use qbot_bus::{BusEvent, ConnectionEvent, TranscriptChange};
use qbot_core::{Message, MessageKind, ShowType};
use qbot_engine::summarize;

#[derive(Debug, Default)]
pub struct Renderer {
    /// Replies already printed, keyed by record id.
    printed: HashSet<String>,
    /// Questions already reported as failed, keyed by request id.
    failed: HashSet<String>,
    /// Last status line shown per placeholder.
    status: HashMap<String, String>,
    bot_name: Option<String>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to print for one bus event.
    pub fn render(&mut self, event: &BusEvent) -> Vec<String> {
        match event {
            BusEvent::TranscriptChanged(change) => self.transcript(change),
            BusEvent::Connection(ev) => connection(ev).into_iter().collect(),
            BusEvent::ServerError(message) => vec![format!("{} {message}", "server error:".red())],
            BusEvent::ConfigChanged(config) => {
                if self.bot_name.as_deref() == Some(config.name.as_str()) {
                    return Vec::new();
                }
                self.bot_name = Some(config.name.clone());
                let availability = if config.is_available { "" } else { " (unavailable)" };
                vec![format!("{}{}", config.name.bold().green(), availability.yellow())]
            }
            BusEvent::TokenStat(_) => Vec::new(),
        }
    }

    fn transcript(&mut self, change: &TranscriptChange) -> Vec<String> {
        let mut lines = Vec::new();
        let bot = self.bot_name.clone().unwrap_or_else(|| "bot".to_string());

        for entry in &change.transcript {
            if entry.is_from_self {
                if entry.failed
                    && let Some(request) = entry.request()
                    && self.failed.insert(request.to_string())
                {
                    lines.push(format!("{}", "no reply received, message failed".red()));
                }
                continue;
            }

            if entry.is_placeholder {
                let key = entry.record().unwrap_or("pending").to_string();
                if let Some(text) = &entry.loading_text
                    && self.status.get(&key) != Some(text)
                {
                    self.status.insert(key, text.clone());
                    lines.push(format!("{}", format!("… {text}").dimmed()));
                }
                continue;
            }

            let Some(record) = entry.record() else {
                continue;
            };
            if !entry.is_final || self.printed.contains(record) {
                continue;
            }
            self.printed.insert(record.to_string());
            lines.extend(reply_lines(&bot, entry, change.kind));
        }
        lines
    }
}

fn reply_lines(bot: &str, entry: &Message, kind: MessageKind) -> Vec<String> {
    let prefix = if entry.is_history {
        format!("{bot}>").dimmed()
    } else {
        format!("{bot}>").cyan()
    };
    let mut lines = vec![format!("{prefix} {}", entry.content)];

    if let Some(thought) = &entry.agent_thought {
        for step in &thought.procedures {
            if step.show_type == Some(ShowType::Md)
                && let Some(text) = step.display_content.as_deref().filter(|t| !t.is_empty())
            {
                lines.push(format!("{}", format!("  thought: {text}").dimmed()));
            }
        }
    }
    for (i, reference) in entry.references.iter().enumerate() {
        let label = reference
            .name
            .clone()
            .or_else(|| reference.url.clone())
            .unwrap_or_else(|| "reference".to_string());
        let id = reference.id.clone().unwrap_or_else(|| (i + 1).to_string());
        lines.push(format!("  [{id}] {label}"));
    }
    if let Some(usage) = entry.token_usage.as_ref().map(summarize)
        && usage.has_counts
    {
        lines.push(format!(
            "{}",
            format!("  tokens: {} (in {}, out {})", usage.total, usage.input, usage.output).dimmed()
        ));
    }
    if kind == MessageKind::Stop {
        lines.push(format!("{}", "  (stopped)".yellow()));
    }
    lines
}

fn connection(event: &ConnectionEvent) -> Option<String> {
    let line = match event {
        ConnectionEvent::Connect => "connected".green().to_string(),
        ConnectionEvent::Reconnect { attempts } => {
            format!("reconnected after {attempts} attempt(s)").green().to_string()
        }
        ConnectionEvent::ReconnectAttempt { .. } => return None,
        ConnectionEvent::ConnectError(e)
        | ConnectionEvent::ReconnectError(e)
        | ConnectionEvent::Error(e) => format!("{}: {e}", event.name()).yellow().to_string(),
        ConnectionEvent::Disconnect(reason) => format!("disconnected: {reason}").yellow().to_string(),
        ConnectionEvent::ReconnectFailed => "gave up reconnecting".red().to_string(),
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(entries: Vec<Message>, kind: MessageKind) -> BusEvent {
        BusEvent::TranscriptChanged(TranscriptChange {
            transcript: entries,
            kind,
        })
    }

    fn reply(record: &str, content: &str, is_final: bool) -> Message {
        Message {
            record_id: Some(record.into()),
            content: content.into(),
            is_final,
            ..Message::default()
        }
    }

    #[test]
    fn prints_each_final_reply_once() {
        colored::control::set_override(false);
        let mut r = Renderer::new();
        assert!(r.render(&change(vec![reply("a", "Hel", false)], MessageKind::Answer)).is_empty());

        let lines = r.render(&change(vec![reply("a", "Hello", true)], MessageKind::Answer));
        assert_eq!(lines, vec!["bot> Hello"]);
        assert!(r.render(&change(vec![reply("a", "Hello", true)], MessageKind::Reference)).is_empty());
    }

    #[test]
    fn placeholder_status_changes_are_shown() {
        colored::control::set_override(false);
        let mut r = Renderer::new();
        let mut row = Message {
            is_placeholder: true,
            is_final: true,
            loading_text: Some("思考中".into()),
            ..Message::default()
        };
        assert_eq!(r.render(&change(vec![row.clone()], MessageKind::Answer)), vec!["… 思考中"]);
        assert!(r.render(&change(vec![row.clone()], MessageKind::Answer)).is_empty());
        row.loading_text = Some("searching".into());
        assert_eq!(r.render(&change(vec![row], MessageKind::Answer)), vec!["… searching"]);
    }

    #[test]
    fn failed_question_reported_once() {
        colored::control::set_override(false);
        let mut r = Renderer::new();
        let q = Message {
            request_id: Some("req".into()),
            is_from_self: true,
            failed: true,
            ..Message::default()
        };
        assert_eq!(r.render(&change(vec![q.clone()], MessageKind::Answer)).len(), 1);
        assert!(r.render(&change(vec![q], MessageKind::Answer)).is_empty());
    }

    #[test]
    fn stopped_reply_is_marked() {
        colored::control::set_override(false);
        let mut r = Renderer::new();
        let lines = r.render(&change(vec![reply("a", "partial", true)], MessageKind::Stop));
        assert_eq!(lines.last().map(String::as_str), Some("  (stopped)"));
    }

    #[test]
    fn reconnect_attempts_are_quiet() {
        colored::control::set_override(false);
        let mut r = Renderer::new();
        let ev = BusEvent::Connection(ConnectionEvent::ReconnectAttempt { attempt: 1 });
        assert!(r.render(&ev).is_empty());
    }
}
