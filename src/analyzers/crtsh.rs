//! crt.sh analyzer: queries the certificate-transparency index.
//!
//! crt.sh has no pagination and no credential; this is the degenerate
//! single-page case of the shared run loop.

use crate::analyzers::ResolvedOptions;
use crate::client::SourceClient;
use crate::core::{Artifact, Page, PageFetcher, PageToken};
use crate::error::SourceFetchError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const SOURCE: &str = "crtsh";
const DEFAULT_BASE_URL: &str = "https://crt.sh";

pub struct CrtshAnalyzer {
    pub(crate) query: String,
    pub(crate) options: ResolvedOptions,
    client: SourceClient,
}

impl CrtshAnalyzer {
    pub fn new(query: String, options: ResolvedOptions) -> Result<Self, SourceFetchError> {
        Self::with_base_url(query, options, DEFAULT_BASE_URL)
    }

    /// Like [`CrtshAnalyzer::new`] but against an explicit endpoint.
    pub fn with_base_url(
        query: String,
        options: ResolvedOptions,
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
            client,
        })
    }
}

#[derive(Deserialize)]
struct CertEntry {
    name_value: String,
    #[serde(default)]
    issuer_name: Option<String>,
    #[serde(default)]
    not_after: Option<String>,
}

#[async_trait]
impl PageFetcher for CrtshAnalyzer {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_page(
        &self,
        query: &str,
        _token: &PageToken,
    ) -> Result<Page, SourceFetchError> {
        let params = [
            ("q", query.to_string()),
            ("output", "json".to_string()),
            ("exclude", "expired".to_string()),
        ];
        let entries: Vec<CertEntry> = self.client.get_json("/", &params).await?;

        // One certificate entry can carry several names (SANs), one per line.
        let artifacts = entries
            .iter()
            .flat_map(|entry| {
                let metadata = json!({
                    "issuer_name": entry.issuer_name,
                    "not_after": entry.not_after,
                });
                entry
                    .name_value
                    .lines()
                    .map(move |name| {
                        Artifact::new(name.trim(), SOURCE).with_metadata(metadata.clone())
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|artifact| !artifact.data.is_empty())
            .collect();

        Ok(Page::last(artifacts))
    }
}
