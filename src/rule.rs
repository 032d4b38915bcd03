//! Rules: the declarative unit of schedulable work.
//!
//! A rule binds a query to an analyzer selector with typed options and a
//! tag list. Its id is content-addressed, so re-saving an unchanged rule is
//! a no-op and a mutated id signals content drift to the caller.

use crate::analyzers::{
    Analyzer, CrtshAnalyzer, FeedAnalyzer, FeedOptions, GreyNoiseAnalyzer, PaginationOptions,
    PassiveDnsAnalyzer, ShodanAnalyzer,
};
use crate::config::Config;
use crate::error::RuleValidationError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Analyzer selectors recognized by [`Rule::to_analyzer`]. The dispatch is
/// a single lookup, not dynamic method resolution.
pub const ANALYZER_SELECTORS: &[&str] = &["shodan", "crtsh", "passive_dns", "greynoise", "feed"];

/// A saved, validated configuration describing what to query, against which
/// source, and with what options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub title: String,
    pub description: String,
    /// One of [`ANALYZER_SELECTORS`].
    pub analyzer: String,
    pub query: String,
    /// Free-form options map; parsed into the selected analyzer's typed
    /// option struct during validation.
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit credential for this rule; takes precedence over the
    /// process-wide fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Content-addressed id over (title, description, analyzer, query,
    /// options). Stable for identical content; timestamps, tags, and
    /// credentials do not participate.
    pub fn id(&self) -> String {
        let content = serde_json::json!({
            "title": self.title,
            "description": self.description,
            "analyzer": self.analyzer,
            "query": self.query,
            "options": self.options,
        });
        // serde_json maps are key-sorted, so the serialization is canonical.
        blake3::hash(content.to_string().as_bytes())
            .to_hex()
            .to_string()
    }

    /// Checks structural well-formedness before any persistence or
    /// execution. A rule that fails validation must not be saved or run.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.title.trim().is_empty() {
            return Err(RuleValidationError::new("title must not be empty"));
        }
        if self.query.trim().is_empty() {
            return Err(RuleValidationError::new("query must not be empty"));
        }
        if !ANALYZER_SELECTORS.contains(&self.analyzer.as_str()) {
            return Err(RuleValidationError::new(format!(
                "unknown analyzer {:?}, expected one of {:?}",
                self.analyzer, ANALYZER_SELECTORS
            )));
        }
        if !self.options.is_null() && !self.options.is_object() {
            return Err(RuleValidationError::new("options must be an object"));
        }

        // Parse the options into the selector's typed struct so that typos
        // fail here rather than being ignored at call time.
        match self.analyzer.as_str() {
            "feed" => {
                self.parsed_options::<FeedOptions>()?;
            }
            _ => {
                self.parsed_options::<PaginationOptions>()?;
            }
        }
        Ok(())
    }

    /// Resolves the analyzer selector to a concrete variant, injecting
    /// query, typed options, and credential material. The rule's explicit
    /// credential wins; otherwise the process-wide configuration supplies
    /// one. Absence is only surfaced when the first request needs it.
    pub fn to_analyzer(&self, config: &Config) -> Result<Analyzer> {
        let credentials = &config.credentials;
        let analyzer = match self.analyzer.as_str() {
            "shodan" => {
                let options = self
                    .parsed_options::<PaginationOptions>()?
                    .resolve(&config.http);
                let api_key = self
                    .api_key
                    .clone()
                    .or_else(|| credentials.shodan_api_key.clone());
                Analyzer::Shodan(ShodanAnalyzer::new(self.query.clone(), options, api_key)?)
            }
            "crtsh" => {
                let options = self
                    .parsed_options::<PaginationOptions>()?
                    .resolve(&config.http);
                Analyzer::Crtsh(CrtshAnalyzer::new(self.query.clone(), options)?)
            }
            "passive_dns" => {
                let options = self
                    .parsed_options::<PaginationOptions>()?
                    .resolve(&config.http);
                let api_key = self
                    .api_key
                    .clone()
                    .or_else(|| credentials.securitytrails_api_key.clone());
                Analyzer::PassiveDns(PassiveDnsAnalyzer::new(
                    self.query.clone(),
                    options,
                    api_key,
                )?)
            }
            "greynoise" => {
                let options = self
                    .parsed_options::<PaginationOptions>()?
                    .resolve(&config.http);
                let api_key = self
                    .api_key
                    .clone()
                    .or_else(|| credentials.greynoise_api_key.clone());
                Analyzer::GreyNoise(GreyNoiseAnalyzer::new(
                    self.query.clone(),
                    options,
                    api_key,
                )?)
            }
            "feed" => {
                let feed_options = self.parsed_options::<FeedOptions>()?;
                let options = feed_options.resolve(&config.http);
                Analyzer::Feed(FeedAnalyzer::new(
                    self.query.clone(),
                    options,
                    feed_options.data_key,
                )?)
            }
            other => {
                // validate() rejects unknown selectors before we get here.
                anyhow::bail!("unknown analyzer selector {other:?}")
            }
        };
        Ok(analyzer)
    }

    fn parsed_options<T: serde::de::DeserializeOwned>(&self) -> Result<T, RuleValidationError> {
        let raw = if self.options.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.options.clone()
        };
        serde_json::from_value(raw).map_err(|e| {
            RuleValidationError::new(format!("invalid options for {}: {e}", self.analyzer))
        })
    }
}
