//! Core domain types and service traits for HuntWatch
//!
//! This module defines the fundamental data structures and trait contracts
//! that govern component interactions throughout the application.

use crate::error::SourceFetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single observable indicator extracted from an external source.
///
/// Two artifacts are considered the same indicator when their `data` values
/// match; `source` and `metadata` never participate in deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// The raw indicator value (IP, domain, hash, URL).
    pub data: String,
    /// Name of the analyzer that produced this artifact.
    pub source: String,
    /// Optional structured context captured at extraction time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Artifact {
    pub fn new(data: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            source: source.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Artifact {}

/// Removes duplicate artifacts by data key, keeping the first occurrence.
///
/// Page ordering is source-defined and assumed stable within one run, so
/// first-wins keeps metadata selection deterministic run to run.
pub fn dedup_stable(artifacts: Vec<Artifact>) -> Vec<Artifact> {
    let mut seen = HashSet::with_capacity(artifacts.len());
    artifacts
        .into_iter()
        .filter(|artifact| seen.insert(artifact.data.clone()))
        .collect()
}

/// The persisted record of net-new artifacts discovered in one run of a rule.
///
/// Created atomically with its artifacts; read-only thereafter except for
/// deletion, which cascades to the artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: i64,
    pub rule_id: String,
    /// Snapshot of the rule's description at creation time.
    pub description: String,
    /// Tags copied from the rule when the alert was created.
    pub tags: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
}

/// Continuation token for page-based sources.
///
/// Numbered-page APIs use `Number`, scroll-style APIs carry an opaque cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    Number(u64),
    Cursor(String),
}

impl PageToken {
    /// The token for the first page of a numbered-page source.
    pub fn first() -> Self {
        PageToken::Number(1)
    }
}

/// One page of results from an external source.
#[derive(Debug, Clone)]
pub struct Page {
    pub artifacts: Vec<Artifact>,
    /// `None` when the source signals no further pages.
    pub next: Option<PageToken>,
}

impl Page {
    /// A terminal page, used by single-shot sources.
    pub fn last(artifacts: Vec<Artifact>) -> Self {
        Self {
            artifacts,
            next: None,
        }
    }
}

/// Fetches one page of raw results from an external source.
///
/// Implementations own their URL construction, auth header format, and the
/// mapping from raw page records to artifacts. A transport or non-2xx
/// response aborts the whole run; no page is independently retryable.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// A short identifier for the source, recorded on every artifact it
    /// produces and used in error context.
    fn source(&self) -> &'static str;

    async fn fetch_page(
        &self,
        query: &str,
        token: &PageToken,
    ) -> Result<Page, SourceFetchError>;
}
