//! Polymorphic analyzers, one variant per supported external source.
//!
//! An analyzer is the executable unit bound to a rule: it drives its source's
//! paginated client until the source is exhausted or the page ceiling is
//! reached, flattens the pages in order, and deduplicates by artifact data
//! key. Variants that need no pagination (crt.sh, passive DNS, generic
//! feeds) are the degenerate one-page case.

pub mod crtsh;
pub mod feed;
pub mod greynoise;
pub mod passive_dns;
pub mod shodan;

pub use crtsh::CrtshAnalyzer;
pub use feed::{FeedAnalyzer, FeedOptions};
pub use greynoise::GreyNoiseAnalyzer;
pub use passive_dns::PassiveDnsAnalyzer;
pub use shodan::ShodanAnalyzer;

use crate::config::HttpConfig;
use crate::core::{dedup_stable, Artifact, PageFetcher, PageToken};
use crate::error::SourceFetchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Per-rule pagination options, overriding the process-wide defaults.
///
/// Deserialized from a rule's free-form options map with unknown keys
/// rejected, so a typo in a rule file fails validation instead of being
/// silently ignored at call time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PaginationOptions {
    /// Maximum number of pages fetched in one run.
    pub pagination_limit: Option<u32>,
    /// Courtesy delay between page requests, in seconds.
    pub pagination_interval_secs: Option<u64>,
    /// Per-request timeout, in seconds.
    pub timeout_secs: Option<u64>,
    /// Overall deadline for the whole run, in seconds.
    pub run_deadline_secs: Option<u64>,
}

impl PaginationOptions {
    /// Fills in unset fields from the process-wide HTTP defaults.
    pub fn resolve(&self, defaults: &HttpConfig) -> ResolvedOptions {
        ResolvedOptions {
            pagination_limit: self.pagination_limit.unwrap_or(defaults.pagination_limit),
            pagination_interval: Duration::from_secs(
                self.pagination_interval_secs
                    .unwrap_or(defaults.pagination_interval_secs),
            ),
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(defaults.timeout_secs)),
            run_deadline_secs: self
                .run_deadline_secs
                .unwrap_or(defaults.run_deadline_secs),
        }
    }
}

/// Pagination options with every default applied.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub pagination_limit: u32,
    pub pagination_interval: Duration,
    pub timeout: Duration,
    pub run_deadline_secs: u64,
}

/// A concrete analyzer, ready to run.
pub enum Analyzer {
    Shodan(ShodanAnalyzer),
    Crtsh(CrtshAnalyzer),
    PassiveDns(PassiveDnsAnalyzer),
    GreyNoise(GreyNoiseAnalyzer),
    Feed(FeedAnalyzer),
}

impl Analyzer {
    fn fetcher(&self) -> &dyn PageFetcher {
        match self {
            Analyzer::Shodan(a) => a,
            Analyzer::Crtsh(a) => a,
            Analyzer::PassiveDns(a) => a,
            Analyzer::GreyNoise(a) => a,
            Analyzer::Feed(a) => a,
        }
    }

    fn query(&self) -> &str {
        match self {
            Analyzer::Shodan(a) => &a.query,
            Analyzer::Crtsh(a) => &a.query,
            Analyzer::PassiveDns(a) => &a.query,
            Analyzer::GreyNoise(a) => &a.query,
            Analyzer::Feed(a) => &a.query,
        }
    }

    fn options(&self) -> &ResolvedOptions {
        match self {
            Analyzer::Shodan(a) => &a.options,
            Analyzer::Crtsh(a) => &a.options,
            Analyzer::PassiveDns(a) => &a.options,
            Analyzer::GreyNoise(a) => &a.options,
            Analyzer::Feed(a) => &a.options,
        }
    }

    /// The source identifier stamped on every artifact this analyzer emits.
    pub fn source(&self) -> &'static str {
        self.fetcher().source()
    }

    /// Executes one run: fetch all pages, flatten, dedup.
    ///
    /// The whole page loop is bounded by the resolved run deadline; hitting
    /// it surfaces `SourceFetchError::DeadlineExceeded` rather than hanging.
    /// Any single page failure aborts the run; earlier pages are discarded.
    pub async fn run(&self) -> Result<Vec<Artifact>, SourceFetchError> {
        let options = self.options();
        let deadline = Duration::from_secs(options.run_deadline_secs);

        let loop_fut = collect_pages(
            self.fetcher(),
            self.query(),
            options.pagination_limit,
            options.pagination_interval,
        );
        let artifacts = match tokio::time::timeout(deadline, loop_fut).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SourceFetchError::DeadlineExceeded {
                    analyzer: self.source(),
                    seconds: options.run_deadline_secs,
                })
            }
        };

        info!(
            source = self.source(),
            count = artifacts.len(),
            "analyzer run finished"
        );
        Ok(artifacts)
    }
}

/// The shared page loop: fetch until the source is exhausted or the page
/// ceiling is reached, flatten in order, dedup by data key.
pub(crate) async fn collect_pages(
    fetcher: &dyn PageFetcher,
    query: &str,
    pagination_limit: u32,
    pagination_interval: Duration,
) -> Result<Vec<Artifact>, SourceFetchError> {
    let mut all = Vec::new();
    let mut token = PageToken::first();

    for page_index in 0..pagination_limit {
        // Rate-limit courtesy: never before the first page.
        if page_index > 0 && !pagination_interval.is_zero() {
            tokio::time::sleep(pagination_interval).await;
        }

        let page = fetcher.fetch_page(query, &token).await?;
        all.extend(page.artifacts);

        match page.next {
            Some(next) => token = next,
            None => break,
        }
    }

    Ok(dedup_stable(all))
}
