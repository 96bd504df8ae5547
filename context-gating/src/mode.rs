//! Gating-mode resolution.
//!
//! The backend understands four levels of process-structure context. The
//! level is derived from [`ContextState`] alone and never stored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::selection::{ContextState, Scope};

/// How much process structure constrains retrieval and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatingMode {
    /// No process selected.
    None,
    /// Only documents of the selected process (filter by name).
    DocsOnly,
    /// Whole-process overview injected into the prompt.
    ProcessContext,
    /// Step-level whitelist around the selected task.
    GatingEnabled,
}

impl GatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatingMode::None => "NONE",
            GatingMode::DocsOnly => "DOCS_ONLY",
            GatingMode::ProcessContext => "PROCESS_CONTEXT",
            GatingMode::GatingEnabled => "GATING_ENABLED",
        }
    }
}

impl fmt::Display for GatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves the gating mode for a selection.
///
/// `Step` without a task silently degrades to [`GatingMode::ProcessContext`].
pub fn resolve_mode(state: &ContextState) -> GatingMode {
    let Some(process) = &state.process else {
        return GatingMode::None;
    };

    if state.scope == Scope::Docs || !process.has_model {
        return GatingMode::DocsOnly;
    }

    match (state.scope, &state.task) {
        (Scope::Step, Some(_)) => GatingMode::GatingEnabled,
        _ => GatingMode::ProcessContext,
    }
}

/// `true` when a modeled process is in step scope without a task.
///
/// Used for a UI hint only; submission is not blocked.
pub fn needs_task_selection(state: &ContextState) -> bool {
    state.is_modeled() && state.scope == Scope::Step && state.task.is_none()
}
