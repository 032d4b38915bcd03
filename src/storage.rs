//! SQLite persistence for rules, alerts, artifacts, and tags.
//!
//! All write paths run inside a single transaction; any failure rolls the
//! whole write back, so a partial alert-without-artifacts state is never
//! observable. The `UNIQUE(rule_id, data)` index on artifacts backstops the
//! per-rule serialization guarantee when two processes race on one rule.

use crate::core::{Alert, Artifact};
use crate::error::PersistenceError;
use crate::rule::Rule;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rules (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    analyzer    TEXT NOT NULL,
    query       TEXT NOT NULL,
    options     TEXT NOT NULL,
    tags        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS alerts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id     TEXT NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
    description TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS artifacts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id    INTEGER NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
    rule_id     TEXT NOT NULL,
    data        TEXT NOT NULL,
    source      TEXT NOT NULL,
    metadata    TEXT,
    created_at  TEXT NOT NULL,
    UNIQUE (rule_id, data)
);
CREATE TABLE IF NOT EXISTS tags (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS alert_tags (
    alert_id INTEGER NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
    tag_id   INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (alert_id, tag_id)
);
CREATE INDEX IF NOT EXISTS idx_alerts_rule_id ON alerts(rule_id);
CREATE INDEX IF NOT EXISTS idx_artifacts_alert_id ON artifacts(alert_id);
";

/// Handle to the SQLite database.
///
/// Safe to share across tasks (`Send + Sync`); statement execution is
/// serialized through an internal mutex, which is acceptable for a batch,
/// rule-at-a-time workload.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (creating if necessary) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Opens a private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -------------------------------------------------------------------
    // Rules
    // -------------------------------------------------------------------

    /// Saves a rule. The id is content-addressed, so re-saving unchanged
    /// content is a no-op. Returns `true` when a new row was written.
    pub fn upsert_rule(&self, rule: &Rule) -> Result<bool, PersistenceError> {
        let tags = serde_json::to_string(&rule.tags).map_err(|cause| {
            PersistenceError::Serialize { what: "rule tags", cause }
        })?;
        let options = serde_json::to_string(&rule.options).map_err(|cause| {
            PersistenceError::Serialize { what: "rule options", cause }
        })?;

        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT INTO rules (id, title, description, analyzer, query, options, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (id) DO NOTHING",
            params![
                rule.id(),
                rule.title,
                rule.description,
                rule.analyzer,
                rule.query,
                options,
                tags,
                rule.created_at.to_rfc3339(),
                rule.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// True when a rule with this id is already stored.
    pub fn rule_exists(&self, rule_id: &str) -> Result<bool, PersistenceError> {
        let conn = self.lock();
        let found: Option<String> = conn
            .query_row(
                "SELECT id FROM rules WHERE id = ?1",
                params![rule_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Deletes a rule; its alerts and their artifacts cascade away.
    pub fn delete_rule(&self, rule_id: &str) -> Result<(), PersistenceError> {
        let conn = self.lock();
        let deleted = conn.execute("DELETE FROM rules WHERE id = ?1", params![rule_id])?;
        if deleted == 0 {
            return Err(PersistenceError::NotFound {
                entity: "rule",
                id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Diff & commit
    // -------------------------------------------------------------------

    /// The cumulative set of artifact data keys recorded across all prior
    /// alerts of this rule.
    pub fn rule_history(&self, rule_id: &str) -> Result<HashSet<String>, PersistenceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT data FROM artifacts WHERE rule_id = ?1")?;
        let rows = stmt.query_map(params![rule_id], |row| row.get::<_, String>(0))?;
        let mut history = HashSet::new();
        for row in rows {
            history.insert(row?);
        }
        Ok(history)
    }

    /// Computes `current - history` for the rule and, when the delta is
    /// non-empty, creates one alert carrying exactly the delta plus the
    /// rule's tags.
    ///
    /// # Returns
    /// * `Ok(Some(alert))` when net-new artifacts were recorded
    /// * `Ok(None)` when nothing was new; zero writes occurred
    pub fn diff_and_commit(
        &self,
        rule: &Rule,
        current: &[Artifact],
    ) -> Result<Option<Alert>, PersistenceError> {
        let history = self.rule_history(&rule.id())?;
        self.commit_delta(rule, current, &history)
    }

    /// Commits the part of `current` absent from the caller's `history`
    /// snapshot, as one alert inside a single transaction.
    ///
    /// The snapshot may be stale when another process committed for the same
    /// rule in the meantime; the `UNIQUE(rule_id, data)` index then fails
    /// the insert, the transaction rolls back, and the error classifies as
    /// a unique violation for the caller to re-diff on.
    pub fn commit_delta(
        &self,
        rule: &Rule,
        current: &[Artifact],
        history: &HashSet<String>,
    ) -> Result<Option<Alert>, PersistenceError> {
        let rule_id = rule.id();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let new_artifacts: Vec<&Artifact> = current
            .iter()
            .filter(|artifact| !history.contains(&artifact.data))
            .collect();

        if new_artifacts.is_empty() {
            debug!(%rule_id, "no net-new artifacts; skipping alert");
            return Ok(None);
        }

        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO alerts (rule_id, description, created_at) VALUES (?1, ?2, ?3)",
            params![rule_id, rule.description, created_at.to_rfc3339()],
        )?;
        let alert_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO artifacts (alert_id, rule_id, data, source, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for artifact in &new_artifacts {
                let metadata = artifact
                    .metadata
                    .as_ref()
                    .map(|m| {
                        serde_json::to_string(m).map_err(|cause| PersistenceError::Serialize {
                            what: "artifact metadata",
                            cause,
                        })
                    })
                    .transpose()?;
                stmt.execute(params![
                    alert_id,
                    rule_id,
                    artifact.data,
                    artifact.source,
                    metadata,
                    created_at.to_rfc3339(),
                ])?;
            }
        }

        for tag in &rule.tags {
            tx.execute(
                "INSERT INTO tags (name) VALUES (?1) ON CONFLICT (name) DO NOTHING",
                params![tag],
            )?;
            tx.execute(
                "INSERT INTO alert_tags (alert_id, tag_id)
                 SELECT ?1, id FROM tags WHERE name = ?2",
                params![alert_id, tag],
            )?;
        }

        tx.commit()?;

        Ok(Some(Alert {
            id: alert_id,
            rule_id,
            description: rule.description.clone(),
            tags: rule.tags.clone(),
            artifacts: new_artifacts.into_iter().cloned().collect(),
            created_at,
        }))
    }

    // -------------------------------------------------------------------
    // Alerts & artifacts
    // -------------------------------------------------------------------

    /// Loads one alert with its artifacts and tags.
    pub fn get_alert(&self, alert_id: i64) -> Result<Alert, PersistenceError> {
        let conn = self.lock();
        let header = conn
            .query_row(
                "SELECT rule_id, description, created_at FROM alerts WHERE id = ?1",
                params![alert_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| PersistenceError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            })?;

        let artifacts = Self::alert_artifacts(&conn, alert_id)?;

        let mut stmt = conn.prepare(
            "SELECT t.name FROM tags t JOIN alert_tags at ON at.tag_id = t.id
             WHERE at.alert_id = ?1 ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![alert_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Alert {
            id: alert_id,
            rule_id: header.0,
            description: header.1,
            tags,
            artifacts,
            created_at: parse_timestamp(&header.2)?,
        })
    }

    /// Lists alert ids for a rule, newest first.
    pub fn list_alerts(&self, rule_id: &str) -> Result<Vec<i64>, PersistenceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM alerts WHERE rule_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let ids = stmt
            .query_map(params![rule_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Deletes one alert; its artifacts cascade away.
    pub fn delete_alert(&self, alert_id: i64) -> Result<(), PersistenceError> {
        let conn = self.lock();
        let deleted = conn.execute("DELETE FROM alerts WHERE id = ?1", params![alert_id])?;
        if deleted == 0 {
            return Err(PersistenceError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            });
        }
        Ok(())
    }

    /// Appends enrichment results to an already-recorded artifact. The data
    /// field itself is immutable; only the metadata may grow. Keys already
    /// present from extraction time are kept unless the enrichment carries
    /// the same key, which overwrites that key alone.
    pub fn attach_metadata(
        &self,
        alert_id: i64,
        data: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), PersistenceError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        // Read-modify-write inside one transaction so concurrent enrichers
        // cannot drop each other's keys.
        let existing: Option<Option<String>> = tx
            .query_row(
                "SELECT metadata FROM artifacts WHERE alert_id = ?1 AND data = ?2",
                params![alert_id, data],
                |row| row.get(0),
            )
            .optional()?;
        let Some(existing) = existing else {
            return Err(PersistenceError::NotFound {
                entity: "artifact",
                id: format!("{alert_id}/{data}"),
            });
        };

        let mut merged = match existing {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|cause| PersistenceError::Serialize {
                    what: "artifact metadata",
                    cause,
                })?
            }
            None => serde_json::Value::Object(serde_json::Map::new()),
        };
        match (&mut merged, metadata) {
            (serde_json::Value::Object(base), serde_json::Value::Object(incoming)) => {
                for (key, value) in incoming {
                    base.insert(key.clone(), value.clone());
                }
            }
            // Non-object metadata has no keys to merge; last write wins.
            _ => merged = metadata.clone(),
        }

        let serialized =
            serde_json::to_string(&merged).map_err(|cause| PersistenceError::Serialize {
                what: "artifact metadata",
                cause,
            })?;
        tx.execute(
            "UPDATE artifacts SET metadata = ?1 WHERE alert_id = ?2 AND data = ?3",
            params![serialized, alert_id, data],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Counts stored artifacts for a rule, for assertions and reporting.
    pub fn artifact_count(&self, rule_id: &str) -> Result<u64, PersistenceError> {
        let conn = self.lock();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE rule_id = ?1",
            params![rule_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Counts stored alerts for a rule.
    pub fn alert_count(&self, rule_id: &str) -> Result<u64, PersistenceError> {
        let conn = self.lock();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE rule_id = ?1",
            params![rule_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn alert_artifacts(
        conn: &Connection,
        alert_id: i64,
    ) -> Result<Vec<Artifact>, PersistenceError> {
        let mut stmt = conn.prepare(
            "SELECT data, source, metadata FROM artifacts WHERE alert_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![alert_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut artifacts = Vec::new();
        for row in rows {
            let (data, source, metadata) = row?;
            let metadata = metadata
                .map(|raw| {
                    serde_json::from_str(&raw).map_err(|cause| PersistenceError::Serialize {
                        what: "artifact metadata",
                        cause,
                    })
                })
                .transpose()?;
            artifacts.push(Artifact {
                data,
                source,
                metadata,
            });
        }
        Ok(artifacts)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|cause| PersistenceError::Timestamp {
            raw: raw.to_string(),
            cause,
        })
}
