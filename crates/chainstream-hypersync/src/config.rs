//! Endpoint configuration for the HyperSync backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Public Ethereum mainnet endpoint.
pub const DEFAULT_URL: &str = "https://eth.hypersync.xyz";

/// Default per-request HTTP timeout, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

pub const ENV_URL: &str = "CHAINSTREAM_URL";
pub const ENV_API_TOKEN: &str = "ENVIO_API_TOKEN";
pub const ENV_TIMEOUT_MS: &str = "CHAINSTREAM_TIMEOUT_MS";

/// Configuration for [`HyperSyncFetcher`](crate::HyperSyncFetcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperSyncConfig {
    /// Base URL of the HyperSync server; `/query` is appended.
    pub url: String,
    /// Sent as a bearer token when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
    /// Upper bound on logs per response, passed through to the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_logs_per_request: Option<u64>,
}

impl Default for HyperSyncConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            api_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_logs_per_request: None,
        }
    }
}

impl HyperSyncConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `CHAINSTREAM_URL`, `ENVIO_API_TOKEN` and
    /// `CHAINSTREAM_TIMEOUT_MS`. Unparseable or empty values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = value(ENV_URL) {
            config.url = url;
        }
        config.api_token = value(ENV_API_TOKEN);
        if let Some(ms) = value(ENV_TIMEOUT_MS).and_then(|v| v.trim().parse().ok()) {
            config.request_timeout_ms = ms;
        }
        config
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_max_logs(mut self, max: u64) -> Self {
        self.max_logs_per_request = Some(max);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
