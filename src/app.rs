//! Top-level wiring: validate a rule, run its analyzer, apply the diff.

use crate::config::Config;
use crate::core::Alert;
use crate::engine::AlertEngine;
use crate::rule::Rule;
use crate::storage::Database;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// The assembled application: configuration, database, and alert engine.
///
/// Invocations are rule-at-a-time; different rules may run concurrently on
/// one `App` because the engine serializes only per rule id.
pub struct App {
    config: Config,
    db: Arc<Database>,
    engine: AlertEngine,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let db = Arc::new(
            Database::open(&config.database.path)
                .with_context(|| format!("opening database {:?}", config.database.path))?,
        );
        let engine = AlertEngine::new(db.clone());
        Ok(Self { config, db, engine })
    }

    /// Builds an `App` on top of an already-open database, used by tests.
    pub fn with_database(config: Config, db: Arc<Database>) -> Self {
        let engine = AlertEngine::new(db.clone());
        Self { config, db, engine }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Executes one run of a rule: validate, save, fetch, diff, commit.
    ///
    /// # Returns
    /// * `Ok(Some(alert))` - the run surfaced net-new artifacts
    /// * `Ok(None)` - the run succeeded and found nothing new
    /// * `Err` - validation, fetch, or persistence failed; nothing was
    ///   written for this run
    pub async fn run_rule(&self, rule: &Rule) -> Result<Option<Alert>> {
        rule.validate()?;
        self.db.upsert_rule(rule)?;

        let analyzer = rule.to_analyzer(&self.config)?;
        info!(rule_id = %rule.id(), source = analyzer.source(), "running rule");
        let artifacts = analyzer.run().await?;

        let alert = self.engine.apply(rule, &artifacts).await?;
        if alert.is_none() {
            info!(rule_id = %rule.id(), "no new artifacts; no alert created");
        }
        Ok(alert)
    }
}
