//! Selectable processes, tasks and roles.
//!
//! Processes come from two sources: imported process models and process names
//! found in document metadata. [`fetch_processes`] merges them into one list,
//! modeled processes first. Everything but the model list degrades to an empty
//! list on failure, so a broken index never blocks process selection.

use std::collections::{HashMap, HashSet};

use context_gating::{ProcessOption, ProcessSource, RoleOption, TaskOption};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::client::QaClient;
use crate::error_handler::ApiError;

const DEFINITIONS_PATH: &str = "/api/bpmn/definitions";
const PROCESS_NAMES_PATH: &str = "/api/search/process-names";

/// Node type offered for step selection.
const USER_TASK: &str = "userTask";

/* ------------------------------------------------------------------------- */
/* Wire shapes                                                               */
/* ------------------------------------------------------------------------- */

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefinitionsResponse {
    #[serde(default)]
    pub definitions: Vec<ModelDefinition>,
}

/// One imported model file; may contain several processes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub processes: Vec<ModelProcess>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelProcess {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessNamesResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub process_names: Vec<DocumentProcess>,
}

/// Process name aggregated from document metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentProcess {
    pub name: String,
    #[serde(default)]
    pub doc_count: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComboResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub nodes: Vec<ComboNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComboNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub node_type: String,
    #[serde(default, rename = "laneId")]
    pub lane_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanesResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub lanes: Vec<RoleOption>,
}

/* ------------------------------------------------------------------------- */
/* Pure merging                                                              */
/* ------------------------------------------------------------------------- */

/// Document processes as options (`doc_<name>` ids, no model).
pub fn document_options(names: Vec<DocumentProcess>) -> Vec<ProcessOption> {
    names
        .into_iter()
        .map(|p| ProcessOption {
            id: format!("doc_{}", p.name),
            name: p.name,
            source: ProcessSource::Docs,
            has_model: false,
            doc_count: Some(p.doc_count),
        })
        .collect()
}

/// Merges modeled and document processes.
///
/// Modeled processes come first, in definition order, and pick up the
/// `doc_count` of a document process with the same name (case-insensitive).
/// Document processes whose name already appeared are dropped.
pub fn merge_processes(
    definitions: &[ModelDefinition],
    documents: Vec<ProcessOption>,
) -> Vec<ProcessOption> {
    let doc_counts: HashMap<String, Option<u32>> = documents
        .iter()
        .map(|d| (d.name.to_lowercase(), d.doc_count))
        .collect();

    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for proc in definitions.iter().flat_map(|d| d.processes.iter()) {
        if proc.id.is_empty() || proc.name.is_empty() {
            continue;
        }
        let key = proc.name.to_lowercase();
        merged.push(ProcessOption {
            id: proc.id.clone(),
            name: proc.name.clone(),
            source: ProcessSource::Modeled,
            has_model: true,
            doc_count: doc_counts.get(&key).copied().flatten(),
        });
        seen.insert(key);
    }

    merged.extend(
        documents
            .into_iter()
            .filter(|d| !seen.contains(&d.name.to_lowercase())),
    );
    merged
}

/// User tasks with a name, first occurrence per case-insensitive name.
pub fn select_tasks(nodes: &[ComboNode]) -> Vec<TaskOption> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .filter(|n| n.node_type == USER_TASK && !n.name.is_empty())
        .filter(|n| seen.insert(n.name.to_lowercase()))
        .map(|n| TaskOption {
            task_id: n.id.clone(),
            task_name: n.name.clone(),
            task_type: Some(n.node_type.clone()),
            lane_id: n.lane_id.clone(),
        })
        .collect()
}

/* ------------------------------------------------------------------------- */
/* Fetchers                                                                  */
/* ------------------------------------------------------------------------- */

/// Document-derived processes; empty on any failure.
pub async fn fetch_document_processes(client: &QaClient) -> Vec<ProcessOption> {
    match client.get_json::<ProcessNamesResponse>(PROCESS_NAMES_PATH).await {
        Ok(resp) if resp.ok => document_options(resp.process_names),
        Ok(_) => {
            warn!("process-name index reported ok=false");
            Vec::new()
        }
        Err(err) => {
            warn!(kind = %err.kind, message = %err.message, "process-name index unavailable");
            Vec::new()
        }
    }
}

/// Merged process list.
///
/// # Errors
/// Fails only if the model definitions cannot be loaded.
#[instrument(skip_all)]
pub async fn fetch_processes(client: &QaClient) -> Result<Vec<ProcessOption>, ApiError> {
    let (definitions, documents) = tokio::join!(
        client.get_json::<DefinitionsResponse>(DEFINITIONS_PATH),
        fetch_document_processes(client),
    );
    let definitions = definitions?.definitions;
    let merged = merge_processes(&definitions, documents);
    debug!(count = merged.len(), "processes loaded");
    Ok(merged)
}

/// Selectable steps of a modeled process; empty on any failure.
#[instrument(skip(client))]
pub async fn fetch_tasks(client: &QaClient, process_id: &str) -> Vec<TaskOption> {
    let path = format!("/api/bpmn/processes/{process_id}/combo");
    match client.get_json::<ComboResponse>(&path).await {
        Ok(resp) if resp.ok => select_tasks(&resp.nodes),
        Ok(_) => Vec::new(),
        Err(err) => {
            warn!(kind = %err.kind, message = %err.message, "failed to load tasks");
            Vec::new()
        }
    }
}

/// Lanes of a modeled process as roles; empty on any failure.
#[instrument(skip(client))]
pub async fn fetch_roles(client: &QaClient, process_id: &str) -> Vec<RoleOption> {
    let path = format!("/api/bpmn/processes/{process_id}/lanes");
    match client.get_json::<LanesResponse>(&path).await {
        Ok(resp) if resp.ok => resp.lanes,
        Ok(_) => Vec::new(),
        Err(err) => {
            warn!(kind = %err.kind, message = %err.message, "failed to load roles");
            Vec::new()
        }
    }
}
