//! Process context for questions to the QA assistant.
//!
//! A user can anchor a question to a business process, a role (lane) and a
//! step (task), and choose how much of the process structure the answer should
//! be scoped to. This crate owns that selection ([`ContextState`]), derives the
//! backend gating mode from it ([`resolve_mode`]) and turns it into the body of
//! an ask request ([`build_request`]).
//!
//! Everything here is pure and synchronous.
//!
//! # Example
//! ```
//! use context_gating::{
//!     AskOptions, ContextState, GatingMode, ProcessOption, ProcessSource, Scope, TaskOption,
//!     build_request, resolve_mode,
//! };
//!
//! let mut ctx = ContextState::new();
//! ctx.set_process(Some(ProcessOption {
//!     id: "p1".into(),
//!     name: "Urlaub".into(),
//!     source: ProcessSource::Modeled,
//!     has_model: true,
//!     doc_count: None,
//! }));
//! ctx.set_scope(Scope::Step);
//! ctx.set_task(Some(TaskOption {
//!     task_id: "t1".into(),
//!     task_name: "Antrag genehmigen".into(),
//!     task_type: None,
//!     lane_id: None,
//! }));
//!
//! assert_eq!(resolve_mode(&ctx), GatingMode::GatingEnabled);
//! let req = build_request("Wer genehmigt den Antrag?", &ctx, AskOptions::default());
//! assert_eq!(req.current_node_id.as_deref(), Some("t1"));
//! ```

pub mod mode;
pub mod request;
pub mod selection;

pub use mode::{GatingMode, needs_task_selection, resolve_mode};
pub use request::{
    AskOptions, AskRequest, DEFAULT_HISTORY_TURNS, HistoryRole, HistoryTurn, build_request,
    cap_history,
};
pub use selection::{ContextState, ProcessOption, ProcessSource, RoleOption, Scope, TaskOption};
