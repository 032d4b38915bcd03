//! Shared HTTP plumbing for paginated source clients.
//!
//! Every analyzer variant builds on `SourceClient`: one outbound request per
//! page with a per-request timeout. A transport error or non-2xx status
//! aborts the whole run; the courtesy delay between pages belongs to the
//! shared page loop, not to the client.

use crate::error::SourceFetchError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// HTTP client for one external source.
pub struct SourceClient {
    source: &'static str,
    base_url: String,
    headers: Vec<(&'static str, String)>,
    client: reqwest::Client,
}

impl SourceClient {
    /// Creates a client for `source` rooted at `base_url`.
    ///
    /// # Arguments
    /// * `headers` - Default headers sent with every request (auth etc.)
    /// * `timeout` - Per-request timeout
    pub fn new(
        source: &'static str,
        base_url: impl Into<String>,
        headers: Vec<(&'static str, String)>,
        timeout: Duration,
    ) -> Result<Self, SourceFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|cause| SourceFetchError::Transport {
                analyzer: source,
                cause,
            })?;
        Ok(Self {
            source,
            base_url: base_url.into(),
            headers,
            client,
        })
    }

    /// Issues one GET request and decodes the JSON response body.
    ///
    /// # Returns
    /// * `Ok(T)` on a 2xx response with a well-formed body
    /// * `Err(SourceFetchError)` for transport failures, non-2xx statuses,
    ///   or a body that does not match `T`
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, SourceFetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(source = self.source, %url, "fetching page");

        let mut request = self.client.get(&url).query(params);
        for (name, value) in &self.headers {
            request = request.header(*name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|cause| SourceFetchError::Transport {
                analyzer: self.source,
                cause,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceFetchError::Status {
                analyzer: self.source,
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|cause| SourceFetchError::Transport {
                analyzer: self.source,
                cause,
            })?;

        serde_json::from_str(&body).map_err(|cause| SourceFetchError::Payload {
            analyzer: self.source,
            cause,
        })
    }
}
