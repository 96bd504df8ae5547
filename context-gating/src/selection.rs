//! User-selected process context: process, role, task and scope.
//!
//! [`ContextState`] is a small deterministic state machine. It is mutated only
//! through its setters and clear operations; each of them is a total function
//! of `(current state, input)` and re-establishes the invariants below before
//! returning:
//!
//! - `role` and `task` are cleared whenever the process changes;
//! - `role`/`task` can only be non-empty under a process that has a model;
//! - `task` is non-empty only while `scope == Step`;
//! - `scope` is `Docs` whenever there is no process or the process has no model.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where a selectable process comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessSource {
    /// Backed by an imported process model (lanes, tasks, gateways).
    #[serde(alias = "neo4j")]
    Modeled,
    /// Derived from document metadata only.
    Docs,
}

/// A process the user can anchor a question to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOption {
    pub id: String,
    pub name: String,
    pub source: ProcessSource,
    pub has_model: bool,
    /// Number of indexed documents tagged with this process name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_count: Option<u32>,
}

/// A lane of a modeled process, presented to the user as a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleOption {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_count: Option<u32>,
}

/// A user-facing step of a modeled process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOption {
    pub task_id: String,
    pub task_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane_id: Option<String>,
}

/// How much of the process structure a question is scoped to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Documents only, filtered by process name.
    #[default]
    Docs,
    /// Whole-process overview (lanes, steps, decisions).
    Overview,
    /// A single step of the process.
    Step,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Docs => "docs",
            Scope::Overview => "overview",
            Scope::Step => "step",
        }
    }
}

/// The selection the next question is anchored to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextState {
    pub process: Option<ProcessOption>,
    pub role: Option<RoleOption>,
    pub task: Option<TaskOption>,
    pub scope: Scope,
}

impl ContextState {
    /// Empty selection, `scope = Docs`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects (or deselects) the process. Role and task are always dropped
    /// and the scope falls back to `Docs`, which works for every process kind.
    pub fn set_process(&mut self, process: Option<ProcessOption>) {
        debug!(
            process = process.as_ref().map(|p| p.name.as_str()).unwrap_or("none"),
            "context: set process"
        );
        self.process = process;
        self.role = None;
        self.task = None;
        self.scope = Scope::Docs;
    }

    /// Selects the role. Without a modeled process this is a no-op.
    ///
    /// A selected task survives only if it lives in the new role's lane.
    pub fn set_role(&mut self, role: Option<RoleOption>) {
        if role.is_some() && !self.is_modeled() {
            debug!("context: role ignored, process has no model");
            return;
        }

        let lane_matches = match &self.task {
            Some(task) => task.lane_id.as_deref() == role.as_ref().map(|r| r.id.as_str()),
            None => true,
        };
        if !lane_matches {
            // scope stays as is; a step scope now waits for a task in the new lane
            debug!("context: task cleared, lane differs from role");
            self.task = None;
        }
        self.role = role;
    }

    /// Selects the task; a task always forces `scope = Step`.
    /// Clearing it drops the scope to `Docs`.
    pub fn set_task(&mut self, task: Option<TaskOption>) {
        if task.is_some() && !self.is_modeled() {
            debug!("context: task ignored, process has no model");
            return;
        }
        self.scope = if task.is_some() {
            Scope::Step
        } else {
            Scope::Docs
        };
        self.task = task;
    }

    /// Changes the scope. `Overview` and `Step` need a modeled process;
    /// any scope other than `Step` drops the task and the role.
    pub fn set_scope(&mut self, scope: Scope) {
        let scope = if self.is_modeled() {
            scope
        } else {
            Scope::Docs
        };
        if scope != Scope::Step {
            self.task = None;
            self.role = None;
        }
        self.scope = scope;
    }

    /// Drops the whole selection.
    pub fn clear_process(&mut self) {
        *self = Self::default();
    }

    /// Drops the task; a step-scoped selection falls back to `Docs`.
    pub fn clear_task(&mut self) {
        self.task = None;
        if self.scope == Scope::Step {
            self.scope = Scope::Docs;
        }
    }

    /// Resets to the initial state (new chat).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    /// `true` when the selected process is backed by a process model.
    pub fn is_modeled(&self) -> bool {
        self.process.as_ref().is_some_and(|p| p.has_model)
    }

    /// `true` when the step scope is active but no task is picked yet.
    pub fn needs_task(&self) -> bool {
        crate::mode::needs_task_selection(self)
    }
}
