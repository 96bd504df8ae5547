//! Streaming session controller: one question, one streamed answer.
//!
//! A turn walks `connecting → waiting → streaming → done`; `error` can follow
//! any phase. Every outcome is reported exactly once: either
//! [`StreamCallbacks::on_done`] or [`StreamCallbacks::on_error`], never both.
//!
//! Three things can cut a turn short and each is its own `select!` branch, so
//! the cause travels with the error instead of being guessed afterwards:
//! - the connection timer (no response headers in time) → `LLM_TIMEOUT`;
//! - the inactivity watchdog (no body chunk in time) → `LLM_TIMEOUT`;
//! - the caller's [`StreamAbortHandle`] → `CANCELLED`.
//!
//! Transport read errors carry no cause at all; they are classified by how
//! long the stream had been silent (see [`classify_read_failure`]).

use std::sync::Arc;
use std::time::{Duration, Instant};

use context_gating::AskRequest;
use futures::StreamExt;
use reqwest::header::{ACCEPT, HeaderValue};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error_handler::{ApiError, ErrorKind, make_snippet};
use crate::sse::{SseParser, StreamEvent};
use crate::types::{StreamMetadata, StreamProgress, StreamStatus, StreamSummary};

/// Receiver of the lifecycle of one streamed turn.
///
/// All methods default to no-ops; implement only what you render.
/// Callbacks run synchronously in event order.
pub trait StreamCallbacks {
    /// The evidence/gating frame that precedes the answer tokens.
    fn on_metadata(&mut self, _metadata: &StreamMetadata) {}
    /// One answer token, in order.
    fn on_token(&mut self, _token: &str) {}
    /// The turn completed.
    fn on_done(&mut self, _summary: &StreamSummary) {}
    /// The turn failed; already normalized.
    fn on_error(&mut self, _error: &ApiError) {}
    /// Status change with counters.
    fn on_progress(&mut self, _progress: StreamProgress) {}
}

/// Callbacks that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;
impl StreamCallbacks for NoopCallbacks {}

/// Timers bounding one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    /// Maximum wait for response headers.
    pub connect_timeout: Duration,
    /// Maximum silence between two body chunks.
    pub inactivity_timeout: Duration,
}

/// Cloneable handle that cancels an in-flight turn.
///
/// Aborting before the turn starts makes it fail immediately; aborting after
/// it finished has no effect.
#[derive(Debug, Clone)]
pub struct StreamAbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StreamAbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once the abort flag is raised; pends forever otherwise.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    let raised = rx.wait_for(|aborted| *aborted).await.is_ok();
    if !raised {
        std::future::pending::<()>().await;
    }
}

/// Classifies a failed body read by the silence that preceded it.
///
/// A read that fails after the stream was idle for the whole inactivity
/// window is a stalled generation; anything earlier is a network problem.
pub fn classify_read_failure(detail: &str, idle: Duration, inactivity: Duration) -> ApiError {
    if idle >= inactivity {
        ApiError::timeout(format!(
            "stream idle for {}ms (limit {}ms): {detail}",
            idle.as_millis(),
            inactivity.as_millis()
        ))
    } else {
        ApiError::network(format!("stream read failed: {detail}"))
    }
}

/// Per-turn bookkeeping and the single point that talks to the callbacks.
struct Tracker<'a, C: ?Sized> {
    callbacks: &'a mut C,
    started: Instant,
    token_count: usize,
    status: StreamStatus,
}

impl<'a, C: StreamCallbacks + ?Sized> Tracker<'a, C> {
    fn new(callbacks: &'a mut C) -> Self {
        Self {
            callbacks,
            started: Instant::now(),
            token_count: 0,
            status: StreamStatus::Connecting,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn progress(&mut self, status: StreamStatus) {
        self.status = status;
        let progress = StreamProgress {
            status,
            token_count: self.token_count,
            elapsed_ms: self.elapsed_ms(),
        };
        self.callbacks.on_progress(progress);
    }

    /// Forwards one parsed event. Returns `true` on the terminal `done` frame.
    fn dispatch(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::Metadata(metadata) => {
                debug!(
                    chunks = metadata.context.len(),
                    gating_mode = %metadata.gating_mode,
                    "metadata frame"
                );
                self.callbacks.on_metadata(&metadata);
                false
            }
            StreamEvent::Token(token) => {
                self.token_count += 1;
                if self.status != StreamStatus::Streaming {
                    self.progress(StreamStatus::Streaming);
                }
                self.callbacks.on_token(&token);
                false
            }
            StreamEvent::Done => true,
        }
    }

    fn summary(&self, done_frame: bool) -> StreamSummary {
        StreamSummary {
            token_count: self.token_count,
            elapsed_ms: self.elapsed_ms(),
            done_frame,
        }
    }

    fn finish(mut self, outcome: Result<StreamSummary, ApiError>) -> Result<StreamSummary, ApiError> {
        match &outcome {
            Ok(summary) => {
                self.progress(StreamStatus::Done);
                info!(
                    tokens = summary.token_count,
                    elapsed_ms = summary.elapsed_ms,
                    done_frame = summary.done_frame,
                    "stream completed"
                );
                self.callbacks.on_done(summary);
            }
            Err(err) => {
                self.progress(StreamStatus::Error);
                error!(
                    kind = %err.kind,
                    retryable = err.retryable,
                    tokens = self.token_count,
                    elapsed_ms = self.elapsed_ms(),
                    message = %err.message,
                    "stream failed"
                );
                self.callbacks.on_error(err);
            }
        }
        outcome
    }
}

/// Runs one streamed turn against `url`.
///
/// Reports the lifecycle to `callbacks` and returns the same outcome. Never
/// retries; the caller decides based on [`ApiError::retryable`].
#[instrument(skip_all, fields(url = %url, query_len = request.query.len()))]
pub(crate) async fn run_stream<C>(
    http: &reqwest::Client,
    url: &str,
    request: &AskRequest,
    limits: StreamLimits,
    abort: &StreamAbortHandle,
    callbacks: &mut C,
) -> Result<StreamSummary, ApiError>
where
    C: StreamCallbacks + ?Sized,
{
    let mut tracker = Tracker::new(callbacks);
    tracker.progress(StreamStatus::Connecting);
    let outcome = drive(&mut tracker, http, url, request, limits, abort).await;
    tracker.finish(outcome)
}

async fn drive<C>(
    tracker: &mut Tracker<'_, C>,
    http: &reqwest::Client,
    url: &str,
    request: &AskRequest,
    limits: StreamLimits,
    abort: &StreamAbortHandle,
) -> Result<StreamSummary, ApiError>
where
    C: StreamCallbacks + ?Sized,
{
    if abort.is_aborted() {
        return Err(ApiError::cancelled());
    }
    let mut abort_rx = abort.subscribe();

    let send = http
        .post(url)
        .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
        .json(request)
        .send();

    let response = tokio::select! {
        biased;
        _ = aborted(&mut abort_rx) => return Err(ApiError::cancelled()),
        sent = timeout(limits.connect_timeout, send) => match sent {
            Err(_) => {
                return Err(ApiError::timeout(format!(
                    "no response headers within {}ms",
                    limits.connect_timeout.as_millis()
                )));
            }
            Ok(Err(e)) => return Err(ApiError::from_transport(&e)),
            Ok(Ok(response)) => response,
        },
    };

    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let body = match timeout(limits.inactivity_timeout, response.text()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(%status, error = %e, "failed to read error body");
                String::new()
            }
            Err(_) => {
                warn!(%status, "timed out reading error body");
                String::new()
            }
        };
        debug!(%status, body = %make_snippet(&body), "non-success response");
        return Err(ApiError::from_response(status, &headers, &body));
    }

    if response.content_length() == Some(0) {
        return Err(ApiError::new(ErrorKind::UnknownError, "no response body").with_retryable(true));
    }

    tracker.progress(StreamStatus::Waiting);

    let mut body = response.bytes_stream();
    let mut parser = SseParser::new();
    let mut last_activity = Instant::now();

    loop {
        let next = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => return Err(ApiError::cancelled()),
            next = timeout(limits.inactivity_timeout, body.next()) => next,
        };

        let chunk = match next {
            Err(_) => {
                return Err(ApiError::timeout(format!(
                    "no data for {}ms after {} tokens",
                    limits.inactivity_timeout.as_millis(),
                    tracker.token_count
                )));
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                if e.is_timeout() {
                    return Err(ApiError::from_transport(&e));
                }
                return Err(classify_read_failure(
                    &e.to_string(),
                    last_activity.elapsed(),
                    limits.inactivity_timeout,
                ));
            }
            Ok(Some(Ok(chunk))) => chunk,
        };
        last_activity = Instant::now();

        for event in parser.feed(&chunk) {
            if tracker.dispatch(event) {
                debug!("done frame received");
                return Ok(tracker.summary(true));
            }
        }
    }

    // Clean close: the last frame may lack its blank line.
    let mut done_frame = false;
    for event in parser.finish() {
        if tracker.dispatch(event) {
            done_frame = true;
            break;
        }
    }
    debug!(done_frame, "stream closed by server");
    Ok(tracker.summary(done_frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        statuses: Vec<StreamStatus>,
        tokens: Vec<String>,
        metadata: usize,
        done: usize,
        errors: Vec<ErrorKind>,
    }

    impl StreamCallbacks for Recorder {
        fn on_metadata(&mut self, _metadata: &StreamMetadata) {
            self.metadata += 1;
        }
        fn on_token(&mut self, token: &str) {
            self.tokens.push(token.to_string());
        }
        fn on_done(&mut self, _summary: &StreamSummary) {
            self.done += 1;
        }
        fn on_error(&mut self, error: &ApiError) {
            self.errors.push(error.kind);
        }
        fn on_progress(&mut self, progress: StreamProgress) {
            self.statuses.push(progress.status);
        }
    }

    #[test]
    fn metadata_does_not_flip_to_streaming() {
        let mut rec = Recorder::default();
        let mut tracker = Tracker::new(&mut rec);
        tracker.progress(StreamStatus::Waiting);
        assert!(!tracker.dispatch(StreamEvent::Metadata(StreamMetadata::default())));
        assert_eq!(tracker.status, StreamStatus::Waiting);

        tracker.dispatch(StreamEvent::Token("a".into()));
        tracker.dispatch(StreamEvent::Token("b".into()));
        assert!(tracker.dispatch(StreamEvent::Done));
        let summary = tracker.summary(true);
        let _ = tracker.finish(Ok(summary));

        assert_eq!(
            rec.statuses,
            vec![
                StreamStatus::Waiting,
                StreamStatus::Streaming,
                StreamStatus::Done
            ]
        );
        assert_eq!(rec.tokens, vec!["a", "b"]);
        assert_eq!(rec.metadata, 1);
        assert_eq!(rec.done, 1);
        assert!(rec.errors.is_empty());
    }

    #[test]
    fn failure_reports_error_only() {
        let mut rec = Recorder::default();
        let tracker = Tracker::new(&mut rec);
        let outcome = tracker.finish(Err(ApiError::network("boom")));
        assert!(outcome.is_err());
        assert_eq!(rec.errors, vec![ErrorKind::NetworkError]);
        assert_eq!(rec.done, 0);
        assert_eq!(rec.statuses, vec![StreamStatus::Error]);
    }

    #[test]
    fn read_failure_after_full_idle_window_is_timeout() {
        let limit = Duration::from_secs(90);
        let err = classify_read_failure("reset", Duration::from_secs(90), limit);
        assert_eq!(err.kind, ErrorKind::LlmTimeout);
        assert!(err.retryable);

        let err = classify_read_failure("reset", Duration::from_secs(3), limit);
        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert!(err.retryable);
    }

    #[test]
    fn abort_handle_is_shared_between_clones() {
        let handle = StreamAbortHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_aborted());
        clone.abort();
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn aborted_resolves_for_late_abort() {
        let handle = StreamAbortHandle::new();
        let mut rx = handle.subscribe();
        let trigger = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.abort();
        });
        timeout(Duration::from_secs(2), aborted(&mut rx))
            .await
            .unwrap();
    }
}
