//! Configuration management for HuntWatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to load configuration from a `huntwatch.toml` file and merge it
//! with environment variables and command-line arguments.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Configuration for the SQLite database.
    pub database: DatabaseConfig,
    /// Defaults applied to every paginated source client.
    pub http: HttpConfig,
    /// Process-wide credential fallback, one entry per source type.
    pub credentials: CredentialsConfig,
}

/// Configuration for the SQLite database.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

/// Defaults applied to every paginated source client. A rule's options may
/// override each of these per run.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Courtesy delay between page requests in seconds. Never applied
    /// before the first page.
    pub pagination_interval_secs: u64,
    /// Maximum number of pages fetched per run.
    pub pagination_limit: u32,
    /// Overall deadline for one analyzer run in seconds.
    pub run_deadline_secs: u64,
}

/// Process-wide credential fallback. A rule's explicit credential always
/// takes precedence; a missing entry is only fatal when the first request
/// that needs it is built.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CredentialsConfig {
    pub shodan_api_key: Option<String>,
    pub securitytrails_api_key: Option<String>,
    pub greynoise_api_key: Option<String>,
}

impl Config {
    /// Loads the application configuration by layering sources: defaults,
    /// the TOML file, `HUNTWATCH_*` environment variables, and CLI args.
    pub fn load(config_path: &str, cli: impl Provider) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // Allow overriding with environment variables, e.g.
            // HUNTWATCH_CREDENTIALS.SHODAN_API_KEY=...
            .merge(Env::prefixed("HUNTWATCH_").split("."))
            .merge(cli)
            .extract()?;
        Ok(config)
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            database: DatabaseConfig {
                path: PathBuf::from("huntwatch.db"),
            },
            http: HttpConfig {
                timeout_secs: 30,
                pagination_interval_secs: 1,
                pagination_limit: 10,
                run_deadline_secs: 300,
            },
            credentials: CredentialsConfig::default(),
        }
    }
}
