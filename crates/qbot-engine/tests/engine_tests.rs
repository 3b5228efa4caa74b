// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciler behavior across whole conversations.

use std::sync::{Arc, Mutex};

use qbot_bus::{BusEvent, EventBus, Topic};
use qbot_config::StreamingPattern;
use qbot_core::wire::ReferenceEvent;
use qbot_core::{AgentThought, Message, MessageKind, ShowType, TokenStat};
use qbot_engine::engine::DEFAULT_LOADING_TEXT;
use qbot_engine::{MemorySnapshot, Reconciler, ReconcilerOptions, SessionStore};
use qbot_test_utils::fixtures;
use serde_json::{json, Value};

struct Harness {
    engine: Reconciler,
    bus: Arc<EventBus>,
    session: String,
    kinds: Arc<Mutex<Vec<MessageKind>>>,
}

fn harness_with(options: ReconcilerOptions) -> Harness {
    let bus = Arc::new(EventBus::new());
    let mut store = SessionStore::new(Box::new(MemorySnapshot::new()), Arc::clone(&bus));
    store.initialize(Some(&json!({"name": "helper", "avatar": "bot.png"})));
    let session = store.session_id().to_string();

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    bus.subscribe(Topic::TranscriptChanged, move |env| {
        if let BusEvent::TranscriptChanged(change) = &env.event {
            sink.lock().unwrap().push(change.kind);
        }
    });

    Harness {
        engine: Reconciler::new(store, Arc::clone(&bus), options),
        bus,
        session,
        kinds,
    }
}

fn harness() -> Harness {
    harness_with(ReconcilerOptions::default())
}

fn message(value: Value) -> Message {
    serde_json::from_value(value).unwrap()
}

impl Harness {
    /// Asks a question and acknowledges it; returns the question timestamp.
    fn ask_and_ack(&mut self, record: &str) -> i64 {
        let q = self.engine.ask("what is rust?");
        let request = q.request_id.clone().unwrap();
        self.engine.apply_reply(message(fixtures::ack(&self.session, &request, record, q.timestamp)));
        q.timestamp
    }

    fn reply(&mut self, record: &str, content: &str, ts: i64, is_final: bool) -> bool {
        self.engine
            .apply_reply(message(fixtures::reply(&self.session, record, content, ts, is_final)))
    }

    fn stat(&mut self, record: &str, titles: &[&str]) -> bool {
        let stat: TokenStat =
            serde_json::from_value(fixtures::token_stat(&self.session, record, titles)).unwrap();
        self.engine.apply_token_stat(stat)
    }

    fn entries(&self) -> Vec<Message> {
        self.engine.snapshot()
    }

    fn last_kind(&self) -> Option<MessageKind> {
        self.kinds.lock().unwrap().last().copied()
    }
}

#[test]
fn streamed_reply_merges_into_one_entry() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    assert!(h.stat("a1", &["searching"]));
    assert!(h.reply("a1", "Hel", ts + 5, false));
    assert!(h.reply("a1", "Hello", ts + 6, true));

    let entries = h.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].is_from_self);
    assert_eq!(entries[0].record_id.as_deref(), Some("q1"));
    let answer = &entries[1];
    assert_eq!(answer.content, "Hello");
    assert!(answer.is_final);
    assert!(!answer.is_placeholder);
    assert!(answer.token_usage.is_some(), "usage carried forward from the placeholder");
    assert_eq!(h.last_kind(), Some(MessageKind::Answer));
}

#[test]
fn question_is_published_with_question_kind() {
    let mut h = harness();
    let q = h.engine.ask("hi");
    assert!(q.is_loading && q.is_from_self && q.is_final);
    assert_eq!(q.session_id.as_deref(), Some(h.session.as_str()));
    assert!(h.engine.is_pending(q.request_id.as_deref().unwrap()));
    assert_eq!(h.last_kind(), Some(MessageKind::Question));
}

#[test]
fn repeated_ack_does_not_add_second_placeholder() {
    let mut h = harness();
    let q = h.engine.ask("hello");
    let request = q.request_id.clone().unwrap();
    let ack = fixtures::ack(&h.session, &request, "q1", q.timestamp);
    h.engine.merge_answer(message(ack.clone()));
    h.engine.merge_answer(message(ack));

    let entries = h.entries();
    assert_eq!(entries.iter().filter(|m| m.is_placeholder).count(), 1);
    assert_eq!(entries[1].from_avatar.as_deref(), Some("bot.png"));
    assert!(!h.engine.is_pending(&request));
}

#[test]
fn no_placeholder_while_transferred_to_human() {
    let mut h = harness();
    h.engine.set_transfer(true, Some("agent.png".into()));
    h.ask_and_ack("q1");
    assert!(h.entries().iter().all(|m| !m.is_placeholder));
}

#[test]
fn expire_fires_once_and_marks_failed() {
    let mut h = harness();
    let q = h.engine.ask("anyone there?");
    let request = q.request_id.unwrap();

    assert!(h.engine.expire(&request));
    assert!(!h.engine.expire(&request));

    let entry = &h.entries()[0];
    assert!(entry.failed);
    assert!(!entry.is_loading);
    assert_eq!(h.entries().len(), 1, "no placeholder for a failed send");
}

#[test]
fn late_answer_for_other_request_leaves_failed_entry() {
    let mut h = harness();
    let q = h.engine.ask("anyone there?");
    let request = q.request_id.unwrap();
    assert!(h.engine.expire(&request));

    h.engine
        .merge_answer(message(fixtures::ack(&h.session, "someone-else", "q9", q.timestamp + 1)));

    let entries = h.entries();
    assert!(entries[0].failed);
    assert!(!entries[0].is_loading);
    assert_eq!(entries[0].request_id.as_deref(), Some(request.as_str()));
    assert!(!h.engine.expire(&request));
    assert_eq!(h.engine.pending_count(), 0);
}

#[test]
fn two_unacknowledged_questions_get_one_placeholder_each() {
    let mut h = harness();
    let q1 = h.engine.ask("first");
    let q2 = h.engine.ask("second");
    for (q, record) in [(&q1, "q1"), (&q2, "q2")] {
        let request = q.request_id.as_deref().unwrap();
        h.engine
            .apply_reply(message(fixtures::ack(&h.session, request, record, q.timestamp)));
    }

    let shape: Vec<_> = h
        .entries()
        .iter()
        .map(|m| match (m.is_placeholder, m.record_id.as_deref()) {
            (true, _) => "P".to_string(),
            (false, Some(r)) => format!("Q{r}"),
            (false, None) => "?".to_string(),
        })
        .collect();
    assert_eq!(shape, vec!["Qq1", "P", "Qq2", "P"]);
    assert_eq!(h.engine.pending_count(), 0);
}

#[test]
fn acknowledged_question_never_expires() {
    let mut h = harness();
    h.ask_and_ack("q1");
    let request = h.entries()[0].request_id.clone().unwrap();
    assert!(!h.engine.expire(&request));
    assert!(!h.entries()[0].failed);
}

#[test]
fn history_merges_in_timestamp_order() {
    let mut h = harness();
    h.engine.merge_answer(message(json!({"record_id": "now", "timestamp": 1000, "is_final": true})));
    h.engine.merge_history(vec![
        message(json!({"record_id": "h1", "timestamp": 10})),
        message(json!({"record_id": "h2", "timestamp": 20})),
    ]);

    let ids: Vec<_> = h.entries().iter().map(|m| m.record_id.clone().unwrap()).collect();
    assert_eq!(ids, vec!["h1", "h2", "now"]);
    assert!(h.entries()[0].is_history);
    assert_eq!(h.last_kind(), Some(MessageKind::History));

    h.engine.merge_history(Vec::new());
    assert_eq!(h.entries().len(), 3);
    assert_eq!(h.last_kind(), Some(MessageKind::History));
}

#[test]
fn older_history_batch_goes_before_current_entries() {
    let mut h = harness();
    for (record, ts) in [("c1", 100), ("c2", 200)] {
        h.engine
            .merge_answer(message(json!({"record_id": record, "timestamp": ts, "is_final": true})));
    }
    h.engine.merge_history(vec![
        message(json!({"record_id": "h1", "timestamp": 50})),
        message(json!({"record_id": "h2", "timestamp": 80})),
    ]);

    let stamps: Vec<i64> = h.entries().iter().map(|m| m.timestamp).collect();
    assert_eq!(stamps, vec![50, 80, 100, 200]);
    assert!(h.entries().iter().all(|m| m.is_final));
}

#[test]
fn duplicate_records_keep_the_older_copy() {
    let mut h = harness();
    h.engine.merge_history(vec![
        message(json!({"record_id": "x", "timestamp": 50, "content": "newer"})),
        message(json!({"record_id": "x", "timestamp": 40, "content": "older"})),
    ]);
    let entries = h.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "older");
}

#[test]
fn reply_citations_are_inlined() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    let mut chunk = fixtures::reply(&h.session, "a1", "abcdef", ts + 1, false);
    chunk["quote_infos"] = json!([
        {"index": 1, "position": 2},
        {"index": 2, "position": 5},
        {"index": 3, "position": 2}
    ]);
    chunk["references"] = json!([{"id": 1, "name": "doc"}]);
    assert!(h.engine.apply_reply(message(chunk)));
    assert_eq!(h.entries()[1].content, "ab[1,3](@ref)cde[2](@ref)f");
}

#[test]
fn other_session_events_are_dropped() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    let before = h.entries();

    let stats = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&stats);
    h.bus.subscribe(Topic::TokenStat, move |_| *counter.lock().unwrap() += 1);

    assert!(!h.engine.apply_reply(message(fixtures::reply("other", "a1", "x", ts, false))));
    let stat: TokenStat =
        serde_json::from_value(fixtures::token_stat("other", "a1", &["t"])).unwrap();
    assert!(!h.engine.apply_token_stat(stat));
    let trace: AgentThought =
        serde_json::from_value(fixtures::thought("other", "q1", json!([]))).unwrap();
    assert!(!h.engine.apply_thought(trace));
    let mut missing = fixtures::reply(&h.session, "a2", "x", ts, false);
    missing.as_object_mut().unwrap().remove("session_id");
    assert!(!h.engine.apply_reply(message(missing)));

    assert_eq!(h.entries(), before);
    assert_eq!(*stats.lock().unwrap(), 1, "raw token stats are republished regardless");
}

#[test]
fn stop_finalizes_streaming_reply_and_drops_late_chunks() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    h.stat("a1", &[]);
    h.reply("a1", "partial", ts + 1, false);

    let ticket = h.engine.stop().unwrap();
    assert_eq!(ticket.record_id.as_deref(), Some("a1"));
    assert_eq!(h.last_kind(), Some(MessageKind::Stop));
    assert!(!MessageKind::Stop.should_autoscroll());

    let stopped = h.entries()[1].clone();
    assert!(stopped.is_final);
    assert_eq!(stopped.content, "partial<span class=\"stop-ws\">| 已停止生成</span>");

    assert!(!h.reply("a1", "partial and more", ts + 2, false));
    assert_eq!(h.entries()[1], stopped);
    assert!(h.engine.stop().is_none());
}

#[test]
fn stopped_placeholder_ignores_late_chunks() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    assert!(h.stat("a1", &[]));
    assert!(!h.entries()[1].is_final, "placeholder streams after the token stat");

    let ticket = h.engine.stop().unwrap();
    assert_eq!(ticket.record_id.as_deref(), Some("a1"));
    let stopped = h.entries()[1].clone();
    assert!(stopped.is_final && !stopped.is_placeholder);
    assert!(stopped.content.ends_with("| 已停止生成</span>"));

    assert!(!h.reply("a1", "chunk already in flight", ts + 3, false));
    assert_eq!(h.entries()[1], stopped);
    assert!(h.entries().iter().all(|m| m.is_final));
}

#[test]
fn stop_without_streaming_publishes_nothing() {
    let mut h = harness();
    h.engine.ask("q");
    let published = h.kinds.lock().unwrap().len();
    assert!(h.engine.stop().is_none());
    assert_eq!(h.kinds.lock().unwrap().len(), published);
}

#[test]
fn token_stat_marks_placeholder_streaming_in_standard_mode() {
    let mut h = harness();
    h.ask_and_ack("q1");
    h.stat("a1", &[]);
    let row = &h.entries()[1];
    assert!(row.is_placeholder);
    assert!(!row.is_final);
    assert_eq!(row.record_id.as_deref(), Some("a1"));
    assert_eq!(row.loading_text.as_deref(), Some(DEFAULT_LOADING_TEXT));

    h.stat("a1", &["searching", "writing"]);
    assert_eq!(h.entries()[1].loading_text.as_deref(), Some("writing"));
}

#[test]
fn brief_mode_keeps_placeholder_final_until_first_chunk() {
    let mut h = harness_with(ReconcilerOptions {
        streaming_pattern: StreamingPattern::Brief,
        ..ReconcilerOptions::default()
    });
    let ts = h.ask_and_ack("q1");
    h.stat("a1", &["searching"]);
    assert!(h.entries()[1].is_final);
    assert!(h.engine.stop().is_none());

    assert!(h.reply("a1", "first", ts + 1, false), "placeholder does not block the reply");
    assert_eq!(h.entries()[1].content, "first");
    assert!(!h.entries()[1].is_final);
}

#[test]
fn token_stat_after_reply_attaches_usage() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    h.reply("a1", "done", ts + 1, false);
    assert!(h.stat("a1", &["writing"]));
    assert!(h.entries()[1].token_usage.is_some());
    assert!(!h.stat("unknown", &[]));
}

#[test]
fn references_filter_hidden_entries() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    h.reply("a1", "text", ts + 1, false);

    let event: ReferenceEvent = serde_json::from_value(fixtures::references(
        "a1",
        json!([{"id": 1, "type": 1}, {"id": 2, "type": 2, "name": "manual"}]),
    ))
    .unwrap();
    assert!(h.engine.apply_references(event));
    let refs = &h.entries()[1].references;
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].name.as_deref(), Some("manual"));
    assert_eq!(h.last_kind(), Some(MessageKind::Reference));

    let unknown: ReferenceEvent =
        serde_json::from_value(fixtures::references("nope", json!([]))).unwrap();
    assert!(!h.engine.apply_references(unknown));
}

#[test]
fn thought_trace_is_classified_and_stored() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    h.reply("a1", "text", ts + 1, false);

    let trace: AgentThought = serde_json::from_value(fixtures::thought(
        &h.session,
        "a1",
        json!([
            {"name": "thought", "status": "processing", "debugging": {"display_content": "hmm"}},
            {"name": "search", "status": "success", "debugging": {
                "display_type": 1,
                "display_content": "result",
                "quote_infos": [{"index": 4, "position": 6}],
                "references": [{"index": 4, "url": "https://example.com"}]
            }}
        ]),
    ))
    .unwrap();
    assert!(h.engine.apply_thought(trace));

    let stored = h.entries()[1].agent_thought.clone().unwrap();
    assert_eq!(stored.procedures[0].show_type, Some(ShowType::Md));
    assert_eq!(stored.procedures[0].display_content.as_deref(), Some("hmm"));
    assert_eq!(stored.procedures[1].show_type, Some(ShowType::SearchReference));
    assert_eq!(stored.procedures[1].display_content.as_deref(), Some("result[4](@ref)"));
}

#[test]
fn later_chunks_keep_references_and_thought() {
    let mut h = harness();
    let ts = h.ask_and_ack("q1");
    h.reply("a1", "a", ts + 1, false);
    let event: ReferenceEvent =
        serde_json::from_value(fixtures::references("a1", json!([{"id": 1}]))).unwrap();
    h.engine.apply_references(event);
    h.reply("a1", "ab", ts + 2, false);
    assert_eq!(h.entries()[1].references.len(), 1);
}

#[test]
fn metadata_updates_session_config() {
    let mut h = harness();
    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&names);
    h.bus.subscribe(Topic::ConfigChanged, move |env| {
        if let BusEvent::ConfigChanged(c) = &env.event {
            sink.lock().unwrap().push(c.name.clone());
        }
    });

    assert!(h.engine.apply_metadata(&json!({"data": {"bot_name": "renamed"}})));
    assert_eq!(h.engine.session().config().name, "renamed");
    assert_eq!(h.engine.session().config().avatar, "bot.png");
    assert_eq!(*names.lock().unwrap(), vec!["renamed"]);
}
