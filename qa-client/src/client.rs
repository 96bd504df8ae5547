//! HTTP client for the QA backend.
//!
//! One `reqwest::Client` is shared by every call. It has no global timeout:
//! streamed turns are bounded by the connection timer and the inactivity
//! watchdog instead (see [`crate::stream`]). Catalog reads use a per-request
//! timeout and a small retry loop for transport failures.

use std::time::Duration;

use context_gating::AskRequest;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::config::QaClientConfig;
use crate::error_handler::{ApiError, ConfigError, ErrorKind, make_snippet};
use crate::health_service::{HealthService, HealthStatus};
use crate::stream::{StreamAbortHandle, StreamCallbacks, StreamLimits, run_stream};
use crate::types::{AskResponse, StreamSummary};

const ASK_PATH: &str = "/api/qa/ask";
const ASK_STREAM_PATH: &str = "/api/qa/ask/stream";

/// Retries of a GET after the first attempt.
const GET_RETRIES: u32 = 3;
/// Back-off unit; attempt `n` waits `n` units.
const GET_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Client for the question-answering backend.
#[derive(Debug, Clone)]
pub struct QaClient {
    http: reqwest::Client,
    health: HealthService,
    config: QaClientConfig,
    retry_delay: Duration,
}

impl QaClient {
    /// Builds the client. `api_key`, if set, is sent as `X-API-Key` on every
    /// call except the health probe.
    ///
    /// # Errors
    /// - [`ConfigError::InvalidFormat`] if the base URL or API key is malformed
    /// - [`ConfigError::HttpClient`] if the HTTP client cannot be constructed
    pub fn new(config: QaClientConfig) -> Result<Self, ConfigError> {
        crate::error_handler::validate_http_endpoint("QA_API_URL", &config.base_url)?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key).map_err(|_| ConfigError::InvalidFormat {
                var: "QA_API_KEY",
                reason: "not a valid header value",
            })?;
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        let health = HealthService::new(config.health_timeout)?;

        debug!(
            base_url = %config.base_url,
            api_key = config.api_key.is_some(),
            connect_timeout_ms = config.connect_timeout.as_millis(),
            inactivity_timeout_ms = config.inactivity_timeout.as_millis(),
            "QaClient initialized"
        );

        Ok(Self {
            http,
            health,
            config,
            retry_delay: GET_RETRY_DELAY,
        })
    }

    /// Shorthand for `QaClient::new(QaClientConfig::from_env()?)`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(QaClientConfig::from_env()?)
    }

    /// Overrides the GET retry back-off unit.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn config(&self) -> &QaClientConfig {
        &self.config
    }

    pub fn limits(&self) -> StreamLimits {
        StreamLimits {
            connect_timeout: self.config.connect_timeout,
            inactivity_timeout: self.config.inactivity_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Non-streaming ask. The whole answer arrives as one JSON body, so the
    /// request is bounded by `ask_timeout` rather than the connection timer.
    #[instrument(skip_all, fields(query_len = request.query.len()))]
    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse, ApiError> {
        let url = self.url(ASK_PATH);
        debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .timeout(self.config.ask_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_response(status, &headers, &text));
        }

        resp.json::<AskResponse>().await.map_err(|e| {
            ApiError::new(ErrorKind::UnknownError, format!("invalid ask response: {e}"))
        })
    }

    /// Streams one answer, reporting progress to `callbacks`.
    pub async fn ask_stream<C>(
        &self,
        request: &AskRequest,
        callbacks: &mut C,
    ) -> Result<StreamSummary, ApiError>
    where
        C: StreamCallbacks + ?Sized,
    {
        self.ask_stream_with_abort(request, &StreamAbortHandle::new(), callbacks)
            .await
    }

    /// Like [`QaClient::ask_stream`], cancellable through `abort`.
    pub async fn ask_stream_with_abort<C>(
        &self,
        request: &AskRequest,
        abort: &StreamAbortHandle,
        callbacks: &mut C,
    ) -> Result<StreamSummary, ApiError>
    where
        C: StreamCallbacks + ?Sized,
    {
        let url = self.url(ASK_STREAM_PATH);
        run_stream(&self.http, &url, request, self.limits(), abort, callbacks).await
    }

    /// Resilient liveness probe; never fails.
    pub async fn health(&self) -> HealthStatus {
        self.health.check(&self.config.base_url).await
    }

    /// GET `path` and decode JSON.
    ///
    /// Transport failures are retried up to three times with linear back-off;
    /// HTTP error statuses are returned at once.
    #[instrument(skip(self))]
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut attempt = 0;

        loop {
            debug!(attempt, "GET {}", url);
            let sent = self
                .http
                .get(&url)
                .timeout(self.config.connect_timeout)
                .send()
                .await;

            let resp = match sent {
                Ok(resp) => resp,
                Err(e) if attempt < GET_RETRIES => {
                    attempt += 1;
                    let delay = self.retry_delay * attempt;
                    warn!(attempt, delay_ms = delay.as_millis(), error = %e, "GET failed; retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(ApiError::from_transport(&e)),
            };

            let status = resp.status();
            if !status.is_success() {
                let headers = resp.headers().clone();
                let text = resp.text().await.unwrap_or_default();
                debug!(%status, body = %make_snippet(&text), "GET returned non-success status");
                return Err(ApiError::from_response(status, &headers, &text));
            }

            return resp.json::<T>().await.map_err(|e| {
                ApiError::new(ErrorKind::UnknownError, format!("invalid JSON from {path}: {e}"))
            });
        }
    }
}
