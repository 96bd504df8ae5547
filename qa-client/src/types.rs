//! Wire types produced by the QA backend and progress types reported to callers.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Reads an explicit `null` as the field's default.
///
/// `#[serde(default)]` only covers absent keys; the backend also sends unset
/// optional fields as `null`.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// A retrieved text fragment with its relevance scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChunk {
    pub chunk_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    /// Dense-retrieval cosine similarity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Cross-encoder logit (unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Payload of the `metadata` frame; precedes the tokens of an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamMetadata {
    #[serde(deserialize_with = "null_as_default")]
    pub context: Vec<EvidenceChunk>,
    #[serde(deserialize_with = "null_as_default")]
    pub gating_mode: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gating_hint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gating_metadata: Map<String, Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub used_model: String,
    #[serde(deserialize_with = "null_as_default")]
    pub used_hyde: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub used_rerank: bool,
}

/// Current position inside a modeled process, as resolved by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub current_node: String,
    #[serde(deserialize_with = "null_as_default")]
    pub current_node_id: String,
    pub current_lane: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub allowed_successors: Vec<Value>,
}

/// Whole-process summary used in overview mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOverview {
    #[serde(deserialize_with = "null_as_default")]
    pub all_lanes: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub all_steps: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub key_decisions: Vec<String>,
}

/// Body of the non-streaming `POST /api/qa/ask`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AskResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub answer: String,
    #[serde(deserialize_with = "null_as_default")]
    pub context: Vec<EvidenceChunk>,
    #[serde(deserialize_with = "null_as_default")]
    pub gating_mode: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gating_hint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gating_metadata: Map<String, Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub whitelist: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub used_model: String,
    #[serde(deserialize_with = "null_as_default")]
    pub used_hyde: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub used_rerank: bool,
    pub used_retrieval_mode: Option<String>,
    pub used_temperature: Option<f64>,
    pub used_llm_backend: Option<String>,
    pub top_k: Option<u32>,
    pub position: Option<PositionInfo>,
    pub process_overview: Option<ProcessOverview>,
}

/// Lifecycle phase of one streamed turn.
///
/// `Connecting → Waiting → Streaming → Done`; `Error` is reachable from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Connecting,
    Waiting,
    Streaming,
    Done,
    Error,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Connecting => "connecting",
            StreamStatus::Waiting => "waiting",
            StreamStatus::Streaming => "streaming",
            StreamStatus::Done => "done",
            StreamStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Progress snapshot reported on every status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamProgress {
    pub status: StreamStatus,
    pub token_count: usize,
    pub elapsed_ms: u64,
}

/// Summary of a successfully completed turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub token_count: usize,
    pub elapsed_ms: u64,
    /// `true` if the backend sent an explicit `done` frame (vs. a clean close).
    pub done_frame: bool,
}
