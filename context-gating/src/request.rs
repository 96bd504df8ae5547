//! Ask-request construction from the current selection.
//!
//! `process_name` is sent whenever a process is selected so the backend can
//! filter documents by name even in docs-only mode. The graph-specific fields
//! (`process_id`, `force_process_context`, `current_node_id`, `roles`) are sent
//! only for a modeled process outside [`GatingMode::DocsOnly`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mode::{GatingMode, resolve_mode};
use crate::selection::ContextState;

/// Default number of prior turns forwarded as `chat_history`.
pub const DEFAULT_HISTORY_TURNS: usize = 10;

/// Author of a history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// One prior message forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub content: String,
}

/// JSON body of `POST /api/qa/ask` and `POST /api/qa/ask/stream`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub query: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_rerank: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_top_n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_hyde: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_process_context: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<HistoryTurn>>,
}

/// Caller-controlled knobs copied verbatim into every request.
///
/// Gating fields are deliberately absent: they come from [`ContextState`] only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AskOptions {
    pub top_k: Option<u32>,
    pub use_rerank: Option<bool>,
    pub rerank_top_n: Option<u32>,
    pub use_hyde: Option<bool>,
    pub model: Option<String>,
    pub definition_id: Option<String>,
    pub prompt_style: Option<String>,
    pub tags: Option<Vec<String>>,
    pub chat_history: Option<Vec<HistoryTurn>>,
}

/// Builds the request for `query` under the given selection.
pub fn build_request(query: &str, state: &ContextState, options: AskOptions) -> AskRequest {
    let mode = resolve_mode(state);

    let mut request = AskRequest {
        query: query.to_string(),
        top_k: options.top_k,
        use_rerank: options.use_rerank,
        rerank_top_n: options.rerank_top_n,
        use_hyde: options.use_hyde,
        model: options.model,
        definition_id: options.definition_id,
        prompt_style: options.prompt_style,
        tags: options.tags,
        chat_history: options.chat_history,
        ..AskRequest::default()
    };

    if let Some(process) = &state.process {
        request.process_name = Some(process.name.clone());

        if mode != GatingMode::DocsOnly && process.has_model {
            request.process_id = Some(process.id.clone());

            if mode == GatingMode::ProcessContext {
                request.force_process_context = Some(true);
            }

            if mode == GatingMode::GatingEnabled {
                request.current_node_id = state.task.as_ref().map(|t| t.task_id.clone());
            }

            if let Some(role) = &state.role {
                request.roles = Some(vec![role.name.clone()]);
            }
        }
    }

    debug!(
        mode = %mode,
        process = request.process_name.as_deref().unwrap_or("none"),
        node = request.current_node_id.as_deref().unwrap_or("none"),
        "built ask request"
    );

    request
}

/// Keeps the most recent `max_turns` entries, preserving order.
///
/// Returns `None` for an empty result so the field is omitted on the wire.
pub fn cap_history<I>(turns: I, max_turns: usize) -> Option<Vec<HistoryTurn>>
where
    I: IntoIterator<Item = HistoryTurn>,
{
    let all: Vec<HistoryTurn> = turns.into_iter().collect();
    let skip = all.len().saturating_sub(max_turns);
    let kept: Vec<HistoryTurn> = all.into_iter().skip(skip).collect();
    (!kept.is_empty()).then_some(kept)
}
