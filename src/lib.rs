/// HuntWatch - a rule-driven poller for external intelligence sources
///
/// This library provides the core functionality for running user-defined
/// rules against network-scan indexes, passive-DNS feeds,
/// certificate-transparency logs, and reputation feeds, and alerting only
/// on artifacts not seen in previous runs of the same rule.
pub mod analyzers;
pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod rule;
pub mod storage;

// Re-export core types for convenience
pub use crate::core::*;
pub use error::{PersistenceError, RuleValidationError, SourceFetchError};
pub use rule::Rule;
