//! One chat turn end-to-end: store the question, stream the answer into the
//! store, attach evidence and confidence.
//!
//! No retry happens here. A retryable failure hands back the exact request
//! that failed so the caller can offer "Retry" and re-issue it unchanged.

use context_gating::{AskOptions, AskRequest, ContextState, build_request, cap_history, resolve_mode};
use tracing::{info, instrument, warn};

use crate::chat_store::{ChatStore, Message, MessageUpdate, NewMessage};
use crate::client::QaClient;
use crate::confidence::{ConfidenceInfo, answer_confidence};
use crate::error_handler::{ApiError, QaClientError, StoreError};
use crate::stream::{NoopCallbacks, StreamAbortHandle, StreamCallbacks};
use crate::types::{EvidenceChunk, StreamMetadata, StreamProgress, StreamSummary};

/// A completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The stored assistant message, with evidence and confidence.
    pub message: Message,
    pub confidence: ConfidenceInfo,
    pub summary: StreamSummary,
    pub request: AskRequest,
}

/// A failed turn.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct TurnError {
    pub error: QaClientError,
    /// The request to re-issue, present only when the failure is retryable.
    pub retry_request: Option<AskRequest>,
}

impl TurnError {
    fn api(error: ApiError, request: &AskRequest) -> Self {
        let retry_request = error.retryable.then(|| request.clone());
        Self {
            error: QaClientError::Api(error),
            retry_request,
        }
    }

    fn store(error: StoreError) -> Self {
        Self {
            error: QaClientError::Store(error),
            retry_request: None,
        }
    }

    pub fn retryable(&self) -> bool {
        self.retry_request.is_some()
    }

    /// Message to show in place of the answer.
    pub fn user_message(&self) -> String {
        match &self.error {
            QaClientError::Api(e) => e.user_message.clone(),
            other => other.to_string(),
        }
    }
}

/// Runs a turn with no observer and no external abort.
pub async fn run_turn<S>(
    client: &QaClient,
    store: &mut S,
    chat_id: &str,
    query: &str,
    context: &ContextState,
    options: AskOptions,
) -> Result<TurnOutcome, TurnError>
where
    S: ChatStore + ?Sized,
{
    run_turn_with(
        client,
        store,
        chat_id,
        query,
        context,
        options,
        &StreamAbortHandle::new(),
        &mut NoopCallbacks,
    )
    .await
}

/// Runs a turn, mirroring every stream event to `observer` (e.g. a renderer).
///
/// History sent with the request is built from the chat's earlier messages,
/// skipping error messages and capped to the configured number of turns.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(chat_id = %chat_id, mode = %resolve_mode(context)))]
pub async fn run_turn_with<S, O>(
    client: &QaClient,
    store: &mut S,
    chat_id: &str,
    query: &str,
    context: &ContextState,
    mut options: AskOptions,
    abort: &StreamAbortHandle,
    observer: &mut O,
) -> Result<TurnOutcome, TurnError>
where
    S: ChatStore + ?Sized,
    O: StreamCallbacks + ?Sized,
{
    let prior = store
        .messages(chat_id)
        .iter()
        .filter_map(Message::as_history_turn)
        .collect::<Vec<_>>();
    options.chat_history = cap_history(prior, client.config().history_turns);

    let request = build_request(query, context, options);

    store
        .append_message(chat_id, NewMessage::user(query))
        .map_err(TurnError::store)?;
    store
        .append_message(chat_id, NewMessage::assistant_placeholder())
        .map_err(TurnError::store)?;

    let mut sink = TurnSink {
        store: &mut *store,
        chat_id,
        observer,
        answer: String::new(),
        evidence: Vec::new(),
        fallback_mode: resolve_mode(context).as_str(),
        store_error: None,
    };
    let result = client.ask_stream_with_abort(&request, abort, &mut sink).await;
    let TurnSink {
        evidence,
        store_error,
        ..
    } = sink;

    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            warn!(kind = %err.kind, retryable = err.retryable, "turn failed");
            return Err(TurnError::api(err, &request));
        }
    };
    if let Some(err) = store_error {
        return Err(TurnError::store(err));
    }

    let confidence = answer_confidence(&evidence);
    let message = store
        .update_last_message(
            chat_id,
            MessageUpdate {
                confidence: Some(confidence.clone()),
                ..MessageUpdate::default()
            },
        )
        .map_err(TurnError::store)?;

    info!(
        tokens = summary.token_count,
        evidence = evidence.len(),
        confidence = %confidence.label,
        "turn completed"
    );
    Ok(TurnOutcome {
        message,
        confidence,
        summary,
        request,
    })
}

/// Writes stream events into the last message of the chat.
struct TurnSink<'a, S: ?Sized, O: ?Sized> {
    store: &'a mut S,
    chat_id: &'a str,
    observer: &'a mut O,
    answer: String,
    evidence: Vec<EvidenceChunk>,
    fallback_mode: &'static str,
    store_error: Option<StoreError>,
}

impl<S, O> TurnSink<'_, S, O>
where
    S: ChatStore + ?Sized,
    O: StreamCallbacks + ?Sized,
{
    fn update(&mut self, update: MessageUpdate) {
        if let Err(err) = self.store.update_last_message(self.chat_id, update) {
            warn!(error = %err, "failed to update assistant message");
            self.store_error.get_or_insert(err);
        }
    }
}

impl<S, O> StreamCallbacks for TurnSink<'_, S, O>
where
    S: ChatStore + ?Sized,
    O: StreamCallbacks + ?Sized,
{
    fn on_metadata(&mut self, metadata: &StreamMetadata) {
        self.evidence = metadata.context.clone();
        let mode = if metadata.gating_mode.is_empty() {
            self.fallback_mode.to_string()
        } else {
            metadata.gating_mode.clone()
        };
        self.update(MessageUpdate {
            evidence: Some(self.evidence.clone()),
            gating_mode: Some(mode),
            ..MessageUpdate::default()
        });
        self.observer.on_metadata(metadata);
    }

    fn on_token(&mut self, token: &str) {
        self.answer.push_str(token);
        self.update(MessageUpdate {
            content: Some(self.answer.clone()),
            ..MessageUpdate::default()
        });
        self.observer.on_token(token);
    }

    fn on_done(&mut self, summary: &StreamSummary) {
        self.observer.on_done(summary);
    }

    fn on_error(&mut self, error: &ApiError) {
        self.update(MessageUpdate {
            content: Some(error.user_message.clone()),
            is_error: Some(true),
            ..MessageUpdate::default()
        });
        self.observer.on_error(error);
    }

    fn on_progress(&mut self, progress: StreamProgress) {
        self.observer.on_progress(progress);
    }
}
