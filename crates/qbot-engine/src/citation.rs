// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inline citation markers.
//!
//! A reply carries `quote_infos`: pairs of (reference index, character
//! position). Markers citing the same position are grouped and rendered as a
//! single `[i1,i2](@ref)` tag spliced into the content at that position.

use qbot_core::{QuoteInfo, Reference};

/// One reference index cited at a position, with the reference it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationTag {
    pub index: i64,
    pub reference: Option<Reference>,
}

/// All tags cited at one character position.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationGroup {
    pub position: usize,
    pub tags: Vec<CitationTag>,
}

impl CitationGroup {
    /// Renders the group as `[i1,i2](@ref)`.
    pub fn render(&self) -> String {
        let indices: Vec<String> = self.tags.iter().map(|t| t.index.to_string()).collect();
        format!("[{}](@ref)", indices.join(","))
    }
}

/// Groups quote markers by position, in order of first appearance.
pub fn group(quote_infos: &[QuoteInfo], references: &[Reference]) -> Vec<CitationGroup> {
    let mut groups: Vec<CitationGroup> = Vec::new();
    for quote in quote_infos {
        let index_key = quote.index.to_string();
        let tag = CitationTag {
            index: quote.index,
            reference: references
                .iter()
                .find(|r| r.id.as_deref() == Some(index_key.as_str()))
                .cloned(),
        };
        match groups.iter_mut().find(|g| g.position == quote.position) {
            Some(existing) => existing.tags.push(tag),
            None => groups.push(CitationGroup {
                position: quote.position,
                tags: vec![tag],
            }),
        }
    }
    groups
}

/// Returns `content` with every citation group spliced in.
///
/// Groups are applied from the highest position down so earlier offsets stay
/// valid. Positions count characters and are clamped to the content length.
pub fn inline(content: &str, quote_infos: &[QuoteInfo], references: &[Reference]) -> String {
    if quote_infos.is_empty() {
        return content.to_string();
    }
    let mut groups = group(quote_infos, references);
    groups.sort_by(|a, b| b.position.cmp(&a.position));

    let mut out = content.to_string();
    let char_count = content.chars().count();
    for g in &groups {
        let at = g.position.min(char_count);
        let byte = out
            .char_indices()
            .nth(at)
            .map_or(out.len(), |(offset, _)| offset);
        out.insert_str(byte, &g.render());
    }
    out
}
