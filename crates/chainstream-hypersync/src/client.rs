//! HyperSync batch fetcher backed by `reqwest`.
//!
//! One `POST /query` per batch. No retries here; wrap the fetcher in a
//! [`RetryingFetcher`](chainstream_core::RetryingFetcher) for that.

use async_trait::async_trait;
use url::Url;

use chainstream_core::types::MAX_TOPIC_SLOTS;
use chainstream_core::{BackendError, BatchFetcher, BatchResponse, BlockRange, LogSelection};

use crate::config::HyperSyncConfig;
use crate::query::{Query, QueryResponse};

/// Longest response body kept in a [`BackendError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// [`BatchFetcher`] for a HyperSync server.
#[derive(Debug, Clone)]
pub struct HyperSyncFetcher {
    http: reqwest::Client,
    query_url: Url,
    api_token: Option<String>,
    max_logs_per_request: Option<u64>,
    name: String,
}

impl HyperSyncFetcher {
    /// Build the HTTP client and resolve the `/query` endpoint.
    pub fn new(config: HyperSyncConfig) -> Result<Self, BackendError> {
        let mut query_url = Url::parse(&config.url)
            .map_err(|e| BackendError::Rejected(format!("invalid url '{}': {e}", config.url)))?;
        query_url
            .path_segments_mut()
            .map_err(|()| BackendError::Rejected(format!("url '{}' cannot be a base", config.url)))?
            .pop_if_empty()
            .push("query");

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("chainstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Other(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            name: query_url.host_str().unwrap_or("hypersync").to_string(),
            query_url,
            api_token: config.api_token,
            max_logs_per_request: config.max_logs_per_request,
        })
    }

    /// The resolved query endpoint.
    pub fn query_url(&self) -> &Url {
        &self.query_url
    }

    async fn send(&self, query: &Query) -> Result<QueryResponse, BackendError> {
        let mut req = self.http.post(self.query_url.clone()).json(query);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(BackendError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BatchFetcher for HyperSyncFetcher {
    async fn fetch(
        &self,
        subrange: BlockRange,
        selections: &[LogSelection],
    ) -> Result<BatchResponse, BackendError> {
        let query = Query::for_range(subrange, selections, self.max_logs_per_request);
        let resp = self.send(&query).await?;
        let batch = resp.into_batch(subrange);
        tracing::debug!(
            backend = %self.name,
            from = subrange.start,
            to = subrange.end,
            next_block = batch.next_block,
            logs = batch.logs.len(),
            "hypersync query"
        );
        Ok(batch)
    }

    fn validate(&self, selections: &[LogSelection]) -> Result<(), BackendError> {
        for selection in selections {
            if selection.topics.len() > MAX_TOPIC_SLOTS {
                return Err(BackendError::Rejected(format!(
                    "{} topic slots given, at most {MAX_TOPIC_SLOTS} allowed",
                    selection.topics.len()
                )));
            }
            for topic in selection.topics.iter().flatten() {
                check_hex(topic, 32, "topic")?;
            }
            for address in &selection.addresses {
                check_hex(address, 20, "address")?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// `value` must be `0x` followed by exactly `bytes` bytes of hex.
fn check_hex(value: &str, bytes: usize, what: &str) -> Result<(), BackendError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.len() != bytes * 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(BackendError::Rejected(format!(
            "{what} '{value}' is not {bytes}-byte hex"
        )));
    }
    Ok(())
}
