//! tokenbench - token query strategy benchmark
//!
//! Drives exact (relational) and probabilistic (sketch) storage strategies
//! through an identical sequence of membership, count, cardinality and top-K
//! queries, timing each step so the results are directly comparable.

use std::time::Duration;
use thiserror::Error;

pub mod bench;
pub mod config;
pub mod corpus;
pub mod models;
pub mod report;
pub mod store;
pub mod strategy;
pub mod util;

/// Errors surfaced by strategies, stores and the harness itself
#[derive(Debug, Error)]
pub enum BenchError {
    /// Transport-level failure: the backend cannot be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The backend refused the request
    #[error("Backend rejected request: {0}")]
    BackendRejected(String),
    /// An operation exceeded its caller-supplied deadline
    #[error("Operation timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    /// A strategy was used outside its lifecycle (e.g. queried before initialization)
    #[error("Invalid strategy state: {0}")]
    InvalidState(String),
    /// A fan-out task panicked or was cancelled
    #[error("Task failed: {0}")]
    TaskFailed(String),
    /// Configuration validation or parsing error
    #[error("Configuration error: {0}")]
    Config(String),
    /// Corpus could not be read or is unusable
    #[error("Corpus error: {0}")]
    Corpus(String),
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for BenchError {
    fn from(err: toml::de::Error) -> Self {
        BenchError::Config(format!("TOML parsing error: {}", err))
    }
}

impl From<toml::ser::Error> for BenchError {
    fn from(err: toml::ser::Error) -> Self {
        BenchError::Config(format!("TOML serialization error: {}", err))
    }
}

impl From<tokio_postgres::Error> for BenchError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            return BenchError::BackendRejected(format!(
                "postgres {}: {}",
                db.code().code(),
                db.message()
            ));
        }

        let transport = err.is_closed()
            || std::error::Error::source(&err)
                .map(|source| source.is::<std::io::Error>())
                .unwrap_or(false);
        if transport {
            BenchError::BackendUnavailable(format!("postgres: {}", err))
        } else {
            BenchError::BackendRejected(format!("postgres: {}", err))
        }
    }
}

impl From<redis::RedisError> for BenchError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            BenchError::BackendUnavailable(format!("redis: {}", err))
        } else {
            BenchError::BackendRejected(format!("redis: {}", err))
        }
    }
}

impl From<tokio::task::JoinError> for BenchError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            BenchError::TaskFailed("task cancelled".to_string())
        } else {
            BenchError::TaskFailed(format!("task panicked: {}", err))
        }
    }
}

/// Result type alias for tokenbench operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Error classification utilities
pub mod error {
    use super::BenchError;

    /// How far an error propagates through a benchmark run
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Severity {
        /// The whole run must stop
        RunFatal,
        /// The offending strategy is retired; other strategies continue
        StrategyFatal,
        /// Recorded as a failed measurement; the strategy continues
        Recoverable,
    }

    /// Classify an error according to the harness propagation rules
    pub fn severity(error: &BenchError) -> Severity {
        match error {
            BenchError::BackendUnavailable(_) => Severity::RunFatal,
            BenchError::Io(_) | BenchError::Config(_) | BenchError::Corpus(_) => {
                Severity::RunFatal
            }
            BenchError::BackendRejected(_)
            | BenchError::InvalidState(_)
            | BenchError::TaskFailed(_) => Severity::StrategyFatal,
            BenchError::Timeout(_) => Severity::Recoverable,
        }
    }

    /// Short machine-friendly name of the error kind
    pub fn kind(error: &BenchError) -> &'static str {
        match error {
            BenchError::BackendUnavailable(_) => "backend_unavailable",
            BenchError::BackendRejected(_) => "backend_rejected",
            BenchError::Timeout(_) => "timeout",
            BenchError::InvalidState(_) => "invalid_state",
            BenchError::TaskFailed(_) => "task_failed",
            BenchError::Config(_) => "config",
            BenchError::Corpus(_) => "corpus",
            BenchError::Io(_) => "io",
        }
    }

    /// Convert error to user-friendly message with suggestions
    pub fn user_friendly_message(error: &BenchError) -> String {
        match error {
            BenchError::BackendUnavailable(msg) => format!(
                "Cannot reach a backend ({}). Check that Postgres and Redis (with the RedisBloom module) are running and the [postgres]/[redis] settings are correct, or use --backend memory.",
                msg
            ),
            BenchError::Config(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            BenchError::Corpus(msg) => {
                format!("Corpus problem: {}. Check the --corpus path.", msg)
            }
            _ => error.to_string(),
        }
    }
}

// Common constants
pub const APP_NAME: &str = "tokenbench";
pub const CONFIG_FILE: &str = "tokenbench.toml";
