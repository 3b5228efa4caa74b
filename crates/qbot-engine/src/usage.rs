// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token usage summary.
//!
//! The backend reports counters under several naming schemes. Per-procedure
//! counts win when present; otherwise the top-level fields and the nested
//! `usage` object are consulted in a fixed alias order.

use qbot_core::types::lenient::value_to_i64;
use qbot_core::TokenStat;
use serde::Serialize;
use serde_json::{Map, Value};

/// Coalesced token counts for one reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub total: u64,
    pub input: u64,
    pub output: u64,
    /// False when the payload carried no counter at all.
    pub has_counts: bool,
}

const TOTAL_KEYS: &[&str] = &[
    "total_tokens",
    "usage.total_tokens",
    "totalTokens",
    "usage.totalTokens",
    "token_count",
    "usage.token_count",
];

const INPUT_KEYS: &[&str] = &[
    "input_tokens",
    "usage.input_tokens",
    "prompt_tokens",
    "usage.prompt_tokens",
    "inputTokens",
    "input_count",
    "usage.input_count",
    "request_tokens",
    "usage.request_tokens",
    "usage.input.tokens",
    "usage.prompt.tokens",
];

const OUTPUT_KEYS: &[&str] = &[
    "output_tokens",
    "usage.output_tokens",
    "completion_tokens",
    "usage.completion_tokens",
    "outputTokens",
    "output_count",
    "usage.output_count",
    "response_tokens",
    "usage.response_tokens",
    "usage.output.tokens",
    "usage.completion.tokens",
];

const STEP_TOTAL_KEYS: &[&str] = &["count", "token_count", "total_tokens"];
const STEP_INPUT_KEYS: &[&str] = &["input_count", "input_tokens", "prompt_tokens", "input.tokens"];
const STEP_OUTPUT_KEYS: &[&str] =
    &["output_count", "output_tokens", "completion_tokens", "output.tokens"];

/// Looks up a dotted path and reads it as a non-negative count.
fn count_at(map: &Map<String, Value>, path: &str) -> Option<u64> {
    let mut parts = path.split('.');
    let mut current = map.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    value_to_i64(current).map(|n| n.max(0) as u64)
}

fn first_count(map: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| count_at(map, k))
}

#[derive(Default)]
struct StepSums {
    total: Option<u64>,
    input: Option<u64>,
    output: Option<u64>,
}

fn add(acc: &mut Option<u64>, value: Option<u64>) {
    if let Some(v) = value {
        *acc = Some(acc.unwrap_or(0) + v);
    }
}

fn procedure_sums(stat: &TokenStat) -> StepSums {
    let mut sums = StepSums::default();
    for step in &stat.procedures {
        let input = first_count(&step.extra, STEP_INPUT_KEYS);
        let output = first_count(&step.extra, STEP_OUTPUT_KEYS);
        let total = first_count(&step.extra, STEP_TOTAL_KEYS).or(match (input, output) {
            (None, None) => None,
            (i, o) => Some(i.unwrap_or(0) + o.unwrap_or(0)),
        });
        add(&mut sums.input, input);
        add(&mut sums.output, output);
        add(&mut sums.total, total);
    }
    sums
}

/// Coalesces the counters of a token-stat payload.
pub fn summarize(stat: &TokenStat) -> UsageSummary {
    let steps = procedure_sums(stat);
    let top = &stat.counters;

    let input = steps.input.or_else(|| first_count(top, INPUT_KEYS));
    let output = steps.output.or_else(|| first_count(top, OUTPUT_KEYS));
    let total = steps
        .total
        .or_else(|| first_count(top, TOTAL_KEYS))
        .or(match (input, output) {
            (None, None) => None,
            (i, o) => Some(i.unwrap_or(0) + o.unwrap_or(0)),
        });

    UsageSummary {
        total: total.unwrap_or(0),
        input: input.unwrap_or(0),
        output: output.unwrap_or(0),
        has_counts: total.is_some() || input.is_some() || output.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(json: &str) -> TokenStat {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn procedure_sums_take_precedence() {
        let s = summarize(&stat(
            r#"{
                "total_tokens": 999,
                "procedures": [
                    {"title": "a", "input_count": 10, "output_count": 5},
                    {"title": "b", "count": 7, "input_tokens": "3"}
                ]
            }"#,
        ));
        assert_eq!(s.input, 13);
        assert_eq!(s.output, 5);
        assert_eq!(s.total, 22);
        assert!(s.has_counts);
    }

    #[test]
    fn top_level_aliases_and_string_counts() {
        let s = summarize(&stat(r#"{"totalTokens": "42", "prompt_tokens": 30, "completion_tokens": "12"}"#));
        assert_eq!(s, UsageSummary { total: 42, input: 30, output: 12, has_counts: true });
    }

    #[test]
    fn nested_usage_object() {
        let s = summarize(&stat(r#"{"usage": {"input": {"tokens": 4}, "output_tokens": 6}}"#));
        assert_eq!(s.input, 4);
        assert_eq!(s.output, 6);
        assert_eq!(s.total, 10);
    }

    #[test]
    fn procedures_without_counts_fall_back_to_top_level() {
        let s = summarize(&stat(r#"{"token_count": 8, "procedures": [{"title": "searching"}]}"#));
        assert_eq!(s.total, 8);
        assert_eq!(s.input, 0);
    }

    #[test]
    fn empty_payload_has_no_counts() {
        let s = summarize(&TokenStat::default());
        assert_eq!(s, UsageSummary::default());
        assert!(!s.has_counts);
    }
}
