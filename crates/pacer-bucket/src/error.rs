//! Error types for token buckets.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or waiting on a bucket.
#[derive(Debug, Error)]
pub enum BucketError {
    /// Requests per second must be positive and representable in nanoseconds.
    #[error("invalid rate: {requests_per_second} requests per second")]
    InvalidRate {
        /// The rejected rate.
        requests_per_second: u64,
    },

    /// Capacity must be at least one token.
    #[error("invalid capacity: {capacity}")]
    InvalidCapacity {
        /// The rejected capacity.
        capacity: u64,
    },

    /// Refill interval must be non-zero and fit in `u64` nanoseconds.
    #[error("invalid refill interval: {interval:?}")]
    InvalidInterval {
        /// The rejected interval.
        interval: Duration,
    },

    /// A blocking wait was cancelled before a token came due.
    #[error("wait cancelled after {waited:?}")]
    Cancelled {
        /// Time spent waiting before cancellation.
        waited: Duration,
    },

    /// Configuration file not found.
    #[error("config file not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// Invalid configuration value.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// Configuration could not be parsed.
    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Parse {
        /// Line of the failure, when known.
        line: Option<usize>,
        /// Parser message.
        message: String,
    },

    /// A `${VAR}` reference had no value and no default.
    #[error("environment variable not found: {var}")]
    EnvVarNotFound {
        /// Variable name.
        var: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BucketError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error came from invalid construction parameters.
    pub fn is_invalid_parameters(&self) -> bool {
        matches!(
            self,
            Self::InvalidRate { .. } | Self::InvalidCapacity { .. } | Self::InvalidInterval { .. }
        )
    }
}

/// Result type for bucket operations.
pub type BucketResult<T> = Result<T, BucketError>;
