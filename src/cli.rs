//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using
//! the `clap` crate. Arguments are parsed at startup and then merged with
//! the configuration from the `huntwatch.toml` file and environment
//! variables. Rule files on disk are already-structured JSON; the core
//! never parses rule-authoring formats itself.

use clap::{Parser, Subcommand};
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// A rule-driven poller for external intelligence sources.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "huntwatch.toml")]
    pub config: PathBuf,

    /// Path to the SQLite database, overriding the configuration.
    #[arg(long, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// The logging level (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one rule and print the created alert, if any.
    Run {
        /// Path to the rule, as a JSON document.
        rule: PathBuf,
    },
    /// List stored alert ids for a rule.
    Alerts {
        /// The rule id.
        rule_id: String,
    },
    /// Delete a rule and, by cascade, all of its alerts and artifacts.
    DeleteRule {
        /// The rule id.
        rule_id: String,
    },
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(path) = &self.database {
            dict.insert(
                "database.path".into(),
                Value::from(path.display().to_string()),
            );
        }
        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
