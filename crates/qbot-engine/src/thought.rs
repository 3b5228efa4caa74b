// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Display preparation for thought traces.

use qbot_core::{Procedure, ShowType};

use crate::citation;

/// Status the backend reports for a completed step.
pub const STATUS_SUCCESS: &str = "success";

/// Procedure name of free-form reasoning steps.
pub const THOUGHT_STEP: &str = "thought";

/// Decides how a procedure step is displayed.
pub fn classify(procedure: &Procedure) -> ShowType {
    if procedure.name == THOUGHT_STEP {
        return ShowType::Md;
    }
    let display_type = procedure.debugging.as_ref().and_then(|d| d.display_type);
    match (procedure.status.as_str(), display_type) {
        (STATUS_SUCCESS, Some(1)) => ShowType::SearchReference,
        (STATUS_SUCCESS, Some(2)) => ShowType::KnowledgeReference,
        _ => ShowType::Json,
    }
}

/// Classifies every step and fills in its display content.
///
/// Search steps get their references keyed by `index` and their own
/// citations inlined.
pub fn prepare(procedures: &mut [Procedure]) {
    for step in procedures.iter_mut() {
        let show_type = classify(step);
        step.show_type = Some(show_type);

        let Some(debugging) = step.debugging.as_mut() else {
            step.display_content = Some(String::new());
            continue;
        };
        let raw = debugging.display_content.clone().unwrap_or_default();

        if show_type == ShowType::SearchReference {
            for reference in &mut debugging.references {
                if reference.index.is_some() {
                    reference.id = reference.index.clone();
                }
            }
            step.display_content = Some(citation::inline(
                &raw,
                &debugging.quote_infos,
                &debugging.references,
            ));
        } else {
            step.display_content = Some(raw);
        }
    }
}
