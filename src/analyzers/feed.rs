//! Generic feed analyzer: pulls a JSON feed and treats each entry as one
//! artifact.
//!
//! The rule's query is the feed URL itself. Feeds are expected to serve a
//! top-level JSON array, either of plain indicator strings or of objects
//! with the indicator under the configured `data_key`. Single-shot: feeds
//! have no pagination.

use crate::analyzers::{PaginationOptions, ResolvedOptions};
use crate::client::SourceClient;
use crate::config::HttpConfig;
use crate::core::{Artifact, Page, PageFetcher, PageToken};
use crate::error::SourceFetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const SOURCE: &str = "feed";

/// Options accepted by the feed analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FeedOptions {
    /// Field holding the indicator when feed entries are objects. Absent
    /// means the feed is a plain array of strings.
    pub data_key: Option<String>,
    /// Per-request timeout, in seconds.
    pub timeout_secs: Option<u64>,
    /// Overall deadline for the run, in seconds.
    pub run_deadline_secs: Option<u64>,
}

impl FeedOptions {
    pub fn resolve(&self, defaults: &HttpConfig) -> ResolvedOptions {
        // A feed is a single page; the shared loop never sleeps or repeats.
        PaginationOptions {
            pagination_limit: Some(1),
            pagination_interval_secs: Some(0),
            timeout_secs: self.timeout_secs,
            run_deadline_secs: self.run_deadline_secs,
        }
        .resolve(defaults)
    }
}

pub struct FeedAnalyzer {
    /// The feed URL.
    pub(crate) query: String,
    pub(crate) options: ResolvedOptions,
    data_key: Option<String>,
    client: SourceClient,
}

impl FeedAnalyzer {
    pub fn new(
        url: String,
        options: ResolvedOptions,
        data_key: Option<String>,
    ) -> Result<Self, SourceFetchError> {
        // The whole URL lives in the query; the client's base URL is empty.
        let client = SourceClient::new(
            SOURCE,
            "",
            Vec::new(),
            options.timeout,
        )?;
        Ok(Self {
            query: url,
            options,
            data_key,
            client,
        })
    }
}

#[async_trait]
impl PageFetcher for FeedAnalyzer {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_page(
        &self,
        query: &str,
        _token: &PageToken,
    ) -> Result<Page, SourceFetchError> {
        let entries: Vec<serde_json::Value> = self.client.get_json(query, &[]).await?;

        let artifacts = entries
            .iter()
            .filter_map(|entry| match &self.data_key {
                Some(key) => entry
                    .get(key)
                    .and_then(|value| value.as_str())
                    .map(|data| Artifact::new(data, SOURCE).with_metadata(entry.clone())),
                None => entry.as_str().map(|data| Artifact::new(data, SOURCE)),
            })
            .collect();

        Ok(Page::last(artifacts))
    }
}
