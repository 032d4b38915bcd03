//! The alert diff & emission engine.
//!
//! Given a rule's current-run artifact set, computes the delta against the
//! rule's persisted history and commits at most one alert per run. The
//! diff/commit step is the only critical section: it runs under a per-rule
//! async lock so two concurrent runs of the same rule can never
//! double-count an artifact. Fetching never holds the lock.

use crate::core::{Alert, Artifact};
use crate::error::PersistenceError;
use crate::rule::Rule;
use crate::storage::Database;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct AlertEngine {
    db: Arc<Database>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AlertEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Applies one run's artifact set to the rule's history.
    ///
    /// # Returns
    /// * `Ok(Some(alert))` - net-new artifacts were found and recorded
    /// * `Ok(None)` - nothing new; a normal, successful outcome
    pub async fn apply(
        &self,
        rule: &Rule,
        current: &[Artifact],
    ) -> Result<Option<Alert>, PersistenceError> {
        let lock = self.rule_lock(rule.id()).await;
        let _guard = lock.lock().await;

        match self.db.diff_and_commit(rule, current) {
            Ok(Some(alert)) => {
                info!(
                    rule_id = %alert.rule_id,
                    alert_id = alert.id,
                    artifacts = alert.artifacts.len(),
                    "alert created"
                );
                Ok(Some(alert))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_unique_violation() => {
                // Another writer (a concurrent process; in-process runs are
                // excluded by the lock) recorded an overlapping set after we
                // read history. Re-diff against the fresh history; whatever
                // remains is genuinely new, and an empty remainder resolves
                // the race as a no-op.
                warn!(rule_id = %rule.id(), "concurrent write detected, re-applying diff");
                self.db.diff_and_commit(rule, current)
            }
            Err(e) => Err(e),
        }
    }

    async fn rule_lock(&self, rule_id: String) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Drop entries no runner is holding, otherwise the map grows by one
        // entry per rule id for the process lifetime.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(rule_id).or_default().clone()
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Artifact;
    use chrono::Utc;

    fn sample_rule() -> Rule {
        Rule {
            title: "engine test".to_string(),
            description: "engine test rule".to_string(),
            analyzer: "crtsh".to_string(),
            query: "example.com".to_string(),
            options: serde_json::Value::Null,
            tags: vec![],
            api_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn artifacts(values: &[&str]) -> Vec<Artifact> {
        values.iter().map(|v| Artifact::new(*v, "crtsh")).collect()
    }

    #[tokio::test]
    async fn concurrent_applies_never_double_count() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let rule = sample_rule();
        db.upsert_rule(&rule).unwrap();
        let engine = Arc::new(AlertEngine::new(db.clone()));

        // Two runs with overlapping sets race on the same rule.
        let mut handles = Vec::new();
        for current in [
            artifacts(&["1.2.3.4", "5.6.7.8"]),
            artifacts(&["5.6.7.8", "9.9.9.9"]),
        ] {
            let engine = engine.clone();
            let rule = rule.clone();
            handles.push(tokio::spawn(async move {
                engine.apply(&rule, &current).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Whatever the interleaving, the union is recorded exactly once.
        assert_eq!(db.artifact_count(&rule.id()).unwrap(), 3);
        let history = db.rule_history(&rule.id()).unwrap();
        assert!(history.contains("5.6.7.8"));
    }

    #[tokio::test]
    async fn a_lost_race_resolves_to_the_residual_delta() {
        // Two handles on one file stand in for two processes racing on the
        // same rule, outside each other's in-process locks.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huntwatch.db");
        let db_a = Arc::new(Database::open(&path).unwrap());
        let db_b = Database::open(&path).unwrap();
        let rule = sample_rule();
        db_a.upsert_rule(&rule).unwrap();
        let current = artifacts(&["5.6.7.8", "9.9.9.9"]);

        // This side observed its history, then the other side committed the
        // overlap first; the unique index fails the stale commit.
        let stale = db_a.rule_history(&rule.id()).unwrap();
        db_b.diff_and_commit(&rule, &artifacts(&["5.6.7.8"])).unwrap();
        let err = db_a.commit_delta(&rule, &current, &stale).unwrap_err();
        assert!(err.is_unique_violation());

        // Re-diffing against fresh history records only the residue, which
        // is what apply does when it sees the violation.
        let engine = AlertEngine::new(db_a.clone());
        let alert = engine.apply(&rule, &current).await.unwrap().unwrap();
        let data: Vec<_> = alert.artifacts.iter().map(|a| a.data.as_str()).collect();
        assert_eq!(data, vec!["9.9.9.9"]);
        assert_eq!(db_a.artifact_count(&rule.id()).unwrap(), 2);
    }

    #[tokio::test]
    async fn an_unresolved_unique_conflict_is_surfaced_after_one_retry() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let rule = sample_rule();
        db.upsert_rule(&rule).unwrap();
        let engine = AlertEngine::new(db.clone());

        // A duplicated data key slips past the history filter on the first
        // commit and again on the single re-diff, so this conflict is not
        // the benign lost-race case and must reach the caller.
        let current = artifacts(&["1.2.3.4", "1.2.3.4"]);
        let err = engine.apply(&rule, &current).await.unwrap_err();

        assert!(err.is_unique_violation());
        assert_eq!(db.alert_count(&rule.id()).unwrap(), 0);
        assert_eq!(db.artifact_count(&rule.id()).unwrap(), 0);
    }

    #[tokio::test]
    async fn idle_rule_locks_are_pruned() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = AlertEngine::new(db.clone());
        for query in ["a", "b", "c"] {
            let mut rule = sample_rule();
            rule.query = query.to_string();
            db.upsert_rule(&rule).unwrap();
            engine.apply(&rule, &artifacts(&[query])).await.unwrap();
        }

        // Each apply released its lock on return, so later acquisitions
        // pruned the idle entries; only the last rule's entry remains.
        assert_eq!(engine.lock_count().await, 1);
    }

    #[tokio::test]
    async fn reapplying_the_same_set_is_a_no_op() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let rule = sample_rule();
        db.upsert_rule(&rule).unwrap();
        let engine = AlertEngine::new(db.clone());
        let current = artifacts(&["1.2.3.4"]);

        let first = engine.apply(&rule, &current).await.unwrap();
        let second = engine.apply(&rule, &current).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(db.alert_count(&rule.id()).unwrap(), 1);
    }
}
