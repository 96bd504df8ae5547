#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use futures::StreamExt;
use qa_client::error_handler::ErrorKind;
use qa_client::{ApiError, QaClient, QaClientConfig, StreamCallbacks, StreamMetadata};
use qa_client::{StreamProgress, StreamStatus, StreamSummary};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// In-process backend; shuts down when dropped.
pub struct MockBackend {
    pub base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_mock(app: Router) -> MockBackend {
    spawn_mock_on("127.0.0.1:0", app).await
}

/// Like [`spawn_mock`], on a fixed address.
pub async fn spawn_mock_on(addr: &str, app: Router) -> MockBackend {
    let listener = TcpListener::bind(addr)
        .await
        .expect("bind mock server listener");
    let address: SocketAddr = listener.local_addr().expect("mock listener local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        server.await.expect("run mock server");
    });
    MockBackend {
        base_url: format!("http://{address}"),
        shutdown: Some(shutdown_tx),
    }
}

/// Request bodies seen by a handler.
pub type RequestLog = Arc<Mutex<Vec<Value>>>;

/// SSE response that sends each chunk after its delay; optionally never ends.
pub fn sse_response(chunks: Vec<(u64, &'static str)>, stall_after: bool) -> Response {
    let body = futures::stream::iter(chunks).then(|(delay_ms, text)| async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok::<_, Infallible>(text)
    });
    let body = if stall_after {
        Body::from_stream(body.chain(futures::stream::pending()))
    } else {
        Body::from_stream(body)
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .expect("sse response")
}

/// A free local address nobody listens on yet.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free-port listener");
    listener.local_addr().expect("free-port listener local addr")
}

pub fn json_response(status: StatusCode, body: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("json response")
}

pub fn client_for(mock: &MockBackend, connect_ms: u64, inactivity_ms: u64) -> QaClient {
    let config = QaClientConfig {
        connect_timeout: Duration::from_millis(connect_ms),
        inactivity_timeout: Duration::from_millis(inactivity_ms),
        ..QaClientConfig::with_base_url(mock.base_url.clone())
    };
    QaClient::new(config)
        .expect("client")
        .with_retry_delay(Duration::from_millis(10))
}

/// Records every callback in order.
#[derive(Debug, Default)]
pub struct Recorder {
    pub statuses: Vec<StreamStatus>,
    pub tokens: Vec<String>,
    pub metadata: Vec<StreamMetadata>,
    pub done: Vec<StreamSummary>,
    pub errors: Vec<ApiError>,
}

impl Recorder {
    pub fn answer(&self) -> String {
        self.tokens.concat()
    }

    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.errors.iter().map(|e| e.kind).collect()
    }
}

impl StreamCallbacks for Recorder {
    fn on_metadata(&mut self, metadata: &StreamMetadata) {
        self.metadata.push(metadata.clone());
    }
    fn on_token(&mut self, token: &str) {
        self.tokens.push(token.to_string());
    }
    fn on_done(&mut self, summary: &StreamSummary) {
        self.done.push(summary.clone());
    }
    fn on_error(&mut self, error: &ApiError) {
        self.errors.push(error.clone());
    }
    fn on_progress(&mut self, progress: StreamProgress) {
        self.statuses.push(progress.status);
    }
}

pub const METADATA_FRAME: &str = "event: metadata\ndata: {\"context\":[{\"chunk_id\":\"c1\",\"text\":\"Urlaubsantrag\",\"rerank_score\":3.0}],\"gating_mode\":\"GATING_ENABLED\",\"gating_hint\":\"\",\"gating_metadata\":{},\"used_model\":\"m\",\"used_hyde\":false,\"used_rerank\":true}\n\n";
