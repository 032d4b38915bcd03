//! Error taxonomy shared across the crate.
//!
//! Three failure families exist: a rule that is structurally malformed, a
//! source fetch that failed mid-run, and a persistence failure during the
//! diff/commit transaction. Callers can always distinguish "ran successfully,
//! nothing new" (an `Ok(None)` alert) from any of these.

use thiserror::Error;

/// A rule failed structural validation and must not be saved or run.
#[derive(Debug, Error)]
#[error("invalid rule: {0}")]
pub struct RuleValidationError(pub String);

impl RuleValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A page fetch failed; the whole run for this rule is aborted.
#[derive(Debug, Error)]
pub enum SourceFetchError {
    /// Transport-level failure (connect, TLS, per-request timeout).
    #[error("request to {analyzer} failed: {cause}")]
    Transport {
        analyzer: &'static str,
        #[source]
        cause: reqwest::Error,
    },

    /// The source answered with a non-success status.
    #[error("{analyzer} returned status {status}")]
    Status {
        analyzer: &'static str,
        status: reqwest::StatusCode,
    },

    /// The response body did not match the expected shape.
    #[error("{analyzer} returned a malformed payload: {cause}")]
    Payload {
        analyzer: &'static str,
        #[source]
        cause: serde_json::Error,
    },

    /// The caller-supplied overall deadline elapsed before the page loop
    /// finished.
    #[error("{analyzer} fetch exceeded the {seconds}s deadline")]
    DeadlineExceeded { analyzer: &'static str, seconds: u64 },

    /// A credential was required but neither the rule nor the process-wide
    /// configuration supplied one.
    #[error("{analyzer} requires a credential but none was configured")]
    MissingCredential { analyzer: &'static str },
}

/// The diff/commit transaction failed and was rolled back.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to serialize {what}: {cause}")]
    Serialize {
        what: &'static str,
        #[source]
        cause: serde_json::Error,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid stored timestamp {raw:?}: {cause}")]
    Timestamp {
        raw: String,
        #[source]
        cause: chrono::ParseError,
    },
}

impl PersistenceError {
    /// True when the underlying failure is the `UNIQUE(rule_id, data)`
    /// constraint on artifacts firing. The alert engine treats this as a
    /// benign "a concurrent run already recorded these" race. Other
    /// constraint failures (foreign keys, NOT NULL) are real faults and
    /// must not be retried, so the check is on the extended result code.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            PersistenceError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}
