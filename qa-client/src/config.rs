//! Client configuration loaded from environment variables.
//!
//! # Environment variables
//!
//! - `QA_API_URL`                 = backend base URL (default `http://localhost:8000`)
//! - `QA_API_KEY`                 = optional key sent as `X-API-Key`
//! - `QA_CONNECT_TIMEOUT_SECS`    = bound on waiting for response headers (default 90)
//! - `QA_INACTIVITY_TIMEOUT_SECS` = max silence between stream chunks (default 90)
//! - `QA_ASK_TIMEOUT_SECS`        = total bound on a non-streamed ask (default 300)
//! - `QA_HEALTH_TIMEOUT_SECS`     = liveness probe timeout (default 5)
//! - `QA_HISTORY_TURNS`           = prior turns forwarded as chat history (default 10)
//! - `QA_TOP_K`                   = optional retrieval depth
//! - `QA_USE_RERANK`              = optional cross-encoder reranking flag

use std::time::Duration;

use context_gating::{AskOptions, DEFAULT_HISTORY_TURNS};

use crate::error_handler::{
    ConfigError, env_opt, env_opt_bool, env_opt_u64, validate_http_endpoint,
};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_ASK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 5;

/// Configuration of a [`crate::QaClient`].
///
/// # Fields
///
/// - `base_url`: backend base URL without trailing slash.
/// - `api_key`: optional key for deployments without a credential-injecting proxy.
/// - `connect_timeout`: maximum wait for response headers of a turn.
/// - `inactivity_timeout`: maximum silence between two body chunks.
/// - `ask_timeout`: total time allowed for a non-streamed answer, generation included.
/// - `health_timeout`: timeout of the liveness probe.
/// - `history_turns`: cap for `chat_history` in outgoing requests.
/// - `top_k` / `use_rerank`: default retrieval knobs copied into every request.
#[derive(Debug, Clone)]
pub struct QaClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub ask_timeout: Duration,
    pub health_timeout: Duration,
    pub history_turns: usize,
    pub top_k: Option<u32>,
    pub use_rerank: Option<bool>,
}

impl Default for QaClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
            ask_timeout: Duration::from_secs(DEFAULT_ASK_TIMEOUT_SECS),
            health_timeout: Duration::from_secs(DEFAULT_HEALTH_TIMEOUT_SECS),
            history_turns: DEFAULT_HISTORY_TURNS,
            top_k: None,
            use_rerank: None,
        }
    }
}

impl QaClientConfig {
    /// Config for `base_url` with all other knobs at their defaults.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds the config strictly from environment variables.
    ///
    /// # Errors
    /// - [`ConfigError::InvalidFormat`] if `QA_API_URL` is not http(s) or a flag is malformed
    /// - [`ConfigError::InvalidNumber`] if a numeric variable does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env_opt("QA_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        validate_http_endpoint("QA_API_URL", base_url.trim())?;

        let secs = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            Ok(Duration::from_secs(env_opt_u64(name)?.unwrap_or(default)))
        };

        let top_k = env_opt_u64("QA_TOP_K")?
            .map(|v| {
                u32::try_from(v).map_err(|_| ConfigError::InvalidNumber {
                    var: "QA_TOP_K",
                    reason: "expected u32",
                })
            })
            .transpose()?;

        let history_turns = env_opt_u64("QA_HISTORY_TURNS")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_HISTORY_TURNS);

        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: env_opt("QA_API_KEY"),
            connect_timeout: secs("QA_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
            inactivity_timeout: secs(
                "QA_INACTIVITY_TIMEOUT_SECS",
                DEFAULT_INACTIVITY_TIMEOUT_SECS,
            )?,
            ask_timeout: secs("QA_ASK_TIMEOUT_SECS", DEFAULT_ASK_TIMEOUT_SECS)?,
            health_timeout: secs("QA_HEALTH_TIMEOUT_SECS", DEFAULT_HEALTH_TIMEOUT_SECS)?,
            history_turns,
            top_k,
            use_rerank: env_opt_bool("QA_USE_RERANK")?,
        })
    }

    /// Default ask options derived from this config.
    pub fn ask_options(&self) -> AskOptions {
        AskOptions {
            top_k: self.top_k,
            use_rerank: self.use_rerank,
            ..AskOptions::default()
        }
    }
}
