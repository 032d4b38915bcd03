//! GreyNoise analyzer: queries the GNQL reputation feed.
//!
//! GreyNoise paginates with an opaque scroll cursor rather than page
//! numbers; the first request carries no cursor.

use crate::analyzers::ResolvedOptions;
use crate::client::SourceClient;
use crate::core::{Artifact, Page, PageFetcher, PageToken};
use crate::error::SourceFetchError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const SOURCE: &str = "greynoise";
const DEFAULT_BASE_URL: &str = "https://api.greynoise.io";
const PAGE_SIZE: u32 = 100;

pub struct GreyNoiseAnalyzer {
    pub(crate) query: String,
    pub(crate) options: ResolvedOptions,
    has_credential: bool,
    client: SourceClient,
}

impl GreyNoiseAnalyzer {
    pub fn new(
        query: String,
        options: ResolvedOptions,
        api_key: Option<String>,
    ) -> Result<Self, SourceFetchError> {
        Self::with_base_url(query, options, api_key, DEFAULT_BASE_URL)
    }

    /// Like [`GreyNoiseAnalyzer::new`] but against an explicit endpoint.
    pub fn with_base_url(
        query: String,
        options: ResolvedOptions,
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceFetchError> {
        let has_credential = api_key.is_some();
        let headers = match api_key {
            Some(key) => vec![("key", key)],
            None => Vec::new(),
        };
        let client = SourceClient::new(
            SOURCE,
            base_url,
            headers,
            options.timeout,
        )?;
        Ok(Self {
            query,
            options,
            has_credential,
            client,
        })
    }
}

#[derive(Deserialize)]
struct GnqlResponse {
    #[serde(default)]
    data: Vec<GnqlEntry>,
    #[serde(default)]
    scroll: Option<String>,
    #[serde(default)]
    complete: bool,
}

#[derive(Deserialize)]
struct GnqlEntry {
    ip: String,
    #[serde(default)]
    classification: Option<String>,
}

#[async_trait]
impl PageFetcher for GreyNoiseAnalyzer {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_page(
        &self,
        query: &str,
        token: &PageToken,
    ) -> Result<Page, SourceFetchError> {
        if !self.has_credential {
            return Err(SourceFetchError::MissingCredential { analyzer: SOURCE });
        }

        let mut params = vec![
            ("query", query.to_string()),
            ("size", PAGE_SIZE.to_string()),
        ];
        if let PageToken::Cursor(scroll) = token {
            params.push(("scroll", scroll.clone()));
        }

        let response: GnqlResponse = self
            .client
            .get_json("/v2/experimental/gnql", &params)
            .await?;

        let artifacts = response
            .data
            .iter()
            .map(|entry| {
                Artifact::new(&entry.ip, SOURCE).with_metadata(json!({
                    "classification": entry.classification,
                }))
            })
            .collect();

        let next = match response.scroll {
            Some(scroll) if !response.complete => Some(PageToken::Cursor(scroll)),
            _ => None,
        };

        Ok(Page { artifacts, next })
    }
}
