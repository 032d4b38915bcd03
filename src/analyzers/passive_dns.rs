//! Passive-DNS analyzer: resolves a domain's historical A records through a
//! SecurityTrails-style history endpoint.
//!
//! Single-shot lookup (no pagination); the credential is an API key sent as
//! a request header.

use crate::analyzers::ResolvedOptions;
use crate::client::SourceClient;
use crate::core::{Artifact, Page, PageFetcher, PageToken};
use crate::error::SourceFetchError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const SOURCE: &str = "passive_dns";
const DEFAULT_BASE_URL: &str = "https://api.securitytrails.com";

pub struct PassiveDnsAnalyzer {
    pub(crate) query: String,
    pub(crate) options: ResolvedOptions,
    has_credential: bool,
    client: SourceClient,
}

impl PassiveDnsAnalyzer {
    pub fn new(
        query: String,
        options: ResolvedOptions,
        api_key: Option<String>,
    ) -> Result<Self, SourceFetchError> {
        Self::with_base_url(query, options, api_key, DEFAULT_BASE_URL)
    }

    /// Like [`PassiveDnsAnalyzer::new`] but against an explicit endpoint.
    pub fn with_base_url(
        query: String,
        options: ResolvedOptions,
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceFetchError> {
        let has_credential = api_key.is_some();
        let headers = match api_key {
            Some(key) => vec![("APIKEY", key)],
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
struct HistoryResponse {
    #[serde(default)]
    records: Vec<HistoryRecord>,
}

#[derive(Deserialize)]
struct HistoryRecord {
    #[serde(default)]
    values: Vec<RecordValue>,
    #[serde(default)]
    first_seen: Option<String>,
    #[serde(default)]
    last_seen: Option<String>,
}

#[derive(Deserialize)]
struct RecordValue {
    ip: String,
}

#[async_trait]
impl PageFetcher for PassiveDnsAnalyzer {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_page(
        &self,
        query: &str,
        _token: &PageToken,
    ) -> Result<Page, SourceFetchError> {
        if !self.has_credential {
            return Err(SourceFetchError::MissingCredential { analyzer: SOURCE });
        }

        let path = format!("/v1/history/{}/dns/a", query);
        let response: HistoryResponse = self.client.get_json(&path, &[]).await?;

        let artifacts = response
            .records
            .iter()
            .flat_map(|record| {
                let metadata = json!({
                    "first_seen": record.first_seen,
                    "last_seen": record.last_seen,
                });
                record
                    .values
                    .iter()
                    .map(move |value| {
                        Artifact::new(&value.ip, SOURCE).with_metadata(metadata.clone())
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(Page::last(artifacts))
    }
}
