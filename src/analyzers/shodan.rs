//! Shodan analyzer: queries the Shodan host-search index.
//!
//! Shodan pages are numbered and sized at 100 results; the loop stops once
//! the reported total is covered or a page comes back empty.

use crate::analyzers::ResolvedOptions;
use crate::client::SourceClient;
use crate::core::{Artifact, Page, PageFetcher, PageToken};
use crate::error::SourceFetchError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const SOURCE: &str = "shodan";
const DEFAULT_BASE_URL: &str = "https://api.shodan.io";
const PAGE_SIZE: u64 = 100;

pub struct ShodanAnalyzer {
    pub(crate) query: String,
    pub(crate) options: ResolvedOptions,
    api_key: Option<String>,
    client: SourceClient,
}

impl ShodanAnalyzer {
    pub fn new(
        query: String,
        options: ResolvedOptions,
        api_key: Option<String>,
    ) -> Result<Self, SourceFetchError> {
        Self::with_base_url(query, options, api_key, DEFAULT_BASE_URL)
    }

    /// Like [`ShodanAnalyzer::new`] but against an explicit endpoint.
    pub fn with_base_url(
        query: String,
        options: ResolvedOptions,
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceFetchError> {
        let client = SourceClient::new(
            SOURCE,
            base_url,
            Vec::new(),
            options.timeout,
        )?;
        Ok(Self {
            query,
            options,
            api_key,
            client,
        })
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: Vec<HostMatch>,
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct HostMatch {
    ip_str: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    hostnames: Vec<String>,
}

#[async_trait]
impl PageFetcher for ShodanAnalyzer {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_page(
        &self,
        query: &str,
        token: &PageToken,
    ) -> Result<Page, SourceFetchError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(SourceFetchError::MissingCredential { analyzer: SOURCE })?;

        let page_number = match token {
            PageToken::Number(n) => *n,
            PageToken::Cursor(_) => 1,
        };
        let params = [
            ("key", api_key.clone()),
            ("query", query.to_string()),
            ("page", page_number.to_string()),
        ];

        let response: SearchResponse =
            self.client.get_json("/shodan/host/search", &params).await?;

        let artifacts = response
            .matches
            .iter()
            .map(|m| {
                Artifact::new(&m.ip_str, SOURCE).with_metadata(json!({
                    "port": m.port,
                    "hostnames": m.hostnames,
                }))
            })
            .collect();

        let exhausted =
            response.matches.is_empty() || page_number * PAGE_SIZE >= response.total;
        let next = if exhausted {
            None
        } else {
            Some(PageToken::Number(page_number + 1))
        };

        Ok(Page { artifacts, next })
    }
}
