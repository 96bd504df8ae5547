//! Client for the process-aware question-answering backend.
//!
//! A turn goes: [`context_gating::build_request`] shapes the request from the
//! user's process selection, [`QaClient::ask_stream`] opens the event stream,
//! [`sse::SseParser`] turns chunks into [`sse::StreamEvent`]s and the session
//! controller in [`stream`] reports them through [`StreamCallbacks`]. When the
//! answer is complete, [`confidence::answer_confidence`] rates it from the
//! evidence. [`turn::run_turn`] wires all of it into a [`chat_store::ChatStore`].

pub mod catalog;
pub mod chat_store;
pub mod client;
pub mod confidence;
pub mod config;
pub mod error_handler;
pub mod health_service;
pub mod sse;
pub mod stream;
pub mod telemetry;
pub mod turn;
pub mod types;

pub use chat_store::{ChatStore, InMemoryChatStore};
pub use client::QaClient;
pub use confidence::{ConfidenceInfo, answer_confidence};
pub use config::QaClientConfig;
pub use error_handler::{ApiError, ConfigError, ErrorKind, QaClientError, Result, StoreError};
pub use health_service::{HealthService, HealthStatus};
pub use stream::{StreamAbortHandle, StreamCallbacks, StreamLimits};
pub use turn::{TurnError, TurnOutcome, run_turn, run_turn_with};
pub use types::{EvidenceChunk, StreamMetadata, StreamProgress, StreamStatus, StreamSummary};
