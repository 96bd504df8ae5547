//! Liveness probe of the QA backend.
//!
//! `GET {base_url}/health`, unauthenticated, bounded by a short timeout
//! (default 5s). Any 2xx counts as healthy. The probe only decides whether a
//! turn is worth attempting; it is not part of the streaming protocol.
//!
//! [`HealthService::check`] is resilient and never fails (errors are mapped to
//! `ok=false`). [`HealthService::try_probe`] returns a strict `Result`.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error_handler::{ApiError, ConfigError, make_snippet};

/// A serializable health snapshot of the backend.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Probed URL.
    pub endpoint: String,
    /// Overall health flag.
    pub ok: bool,
    /// HTTP status of a successful probe.
    pub status: Option<u16>,
    /// Measured latency in milliseconds.
    pub latency_ms: u128,
    /// Short human-readable message with details.
    pub message: String,
}

impl HealthStatus {
    fn fail(endpoint: &str, latency_ms: u128, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ok: false,
            status: None,
            latency_ms,
            message: message.into(),
        }
    }
}

/// Health checker with its own unauthenticated HTTP client.
#[derive(Debug, Clone)]
pub struct HealthService {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthService {
    /// # Errors
    /// Returns [`ConfigError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        debug!(timeout_ms = timeout.as_millis(), "HealthService initialized");
        Ok(Self { client, timeout })
    }

    /// Probes `base_url`. Never returns an error.
    pub async fn check(&self, base_url: &str) -> HealthStatus {
        let base = base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            warn!(endpoint = %base, "invalid endpoint (missing http/https)");
            return HealthStatus::fail(base, 0, "endpoint is missing http/https");
        }

        let start = Instant::now();
        match self.try_probe(base).await {
            Ok(status) => {
                info!(
                    endpoint = %status.endpoint,
                    latency_ms = status.latency_ms,
                    "health probe completed"
                );
                status
            }
            Err(err) => {
                let latency = start.elapsed().as_millis();
                warn!(
                    endpoint = %base,
                    kind = %err.kind,
                    latency_ms = latency,
                    message = %err.message,
                    "health probe failed"
                );
                HealthStatus::fail(&health_url(base), latency, err.to_string())
            }
        }
    }

    /// Strict probe: transport failures and non-2xx statuses are errors.
    pub async fn try_probe(&self, base_url: &str) -> Result<HealthStatus, ApiError> {
        let url = health_url(base_url);
        let start = Instant::now();
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;

        let latency = start.elapsed().as_millis();
        let status = resp.status();

        if !status.is_success() {
            let headers = resp.headers().clone();
            let text = resp.text().await.unwrap_or_default();
            warn!(%url, %status, snippet = %make_snippet(&text), "health returned non-success status");
            return Err(ApiError::from_response(status, &headers, &text));
        }

        // Best-effort: `{"status": "..."}`; any 2xx body is fine.
        #[derive(serde::Deserialize)]
        struct Body {
            status: Option<String>,
        }
        let message = match resp.json::<Body>().await {
            Ok(Body { status: Some(s) }) => format!("backend is healthy ({s})"),
            _ => "backend is healthy".to_string(),
        };

        Ok(HealthStatus {
            endpoint: url,
            ok: true,
            status: Some(status.as_u16()),
            latency_ms: latency,
            message,
        })
    }
}

fn health_url(base_url: &str) -> String {
    format!("{}/health", base_url.trim().trim_end_matches('/'))
}
