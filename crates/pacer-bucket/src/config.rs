//! Bucket configuration from YAML files and environment variables.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{BucketError, BucketResult};
use crate::state::{rate_interval, BucketState};

/// Environment variable names.
pub mod vars {
    /// Rate for a single-token bucket.
    pub const PACER_REQUESTS_PER_SECOND: &str = "PACER_REQUESTS_PER_SECOND";
    /// Refill interval in milliseconds, paired with `PACER_CAPACITY`.
    pub const PACER_REFILL_INTERVAL_MS: &str = "PACER_REFILL_INTERVAL_MS";
    /// Tokens added per refill interval.
    pub const PACER_CAPACITY: &str = "PACER_CAPACITY";
}

/// How a bucket is built.
///
/// ```yaml
/// mode: interval
/// refill_interval_ms: 1000
/// capacity: 10
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BucketConfig {
    /// Refill `capacity` tokens every `refill_interval_ms`.
    Interval {
        /// Milliseconds between refills.
        refill_interval_ms: u64,
        /// Maximum tokens, also the amount added per refill.
        capacity: u64,
    },
    /// One token every `1s / requests_per_second`.
    Rate {
        /// Requests admitted per second.
        requests_per_second: u64,
    },
}

impl BucketConfig {
    /// Parse and validate YAML, expanding `${VAR}` and `${VAR:-default}`.
    pub fn from_yaml_str(content: &str) -> BucketResult<Self> {
        let expanded = expand_env_vars(content)?;

        let config: Self = serde_yaml::from_str(&expanded).map_err(|e| BucketError::Parse {
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> BucketResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BucketError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Read configuration from `PACER_*` variables.
    ///
    /// `PACER_REQUESTS_PER_SECOND` wins over `PACER_REFILL_INTERVAL_MS` and
    /// `PACER_CAPACITY`. Returns `None` when no bucket variables are set.
    pub fn from_env() -> BucketResult<Option<Self>> {
        if let Some(requests_per_second) = env_u64(vars::PACER_REQUESTS_PER_SECOND)? {
            let config = Self::Rate {
                requests_per_second,
            };
            config.validate()?;
            return Ok(Some(config));
        }

        let interval = env_u64(vars::PACER_REFILL_INTERVAL_MS)?;
        let capacity = env_u64(vars::PACER_CAPACITY)?;

        let config = match (interval, capacity) {
            (None, None) => return Ok(None),
            (Some(refill_interval_ms), Some(capacity)) => Self::Interval {
                refill_interval_ms,
                capacity,
            },
            (Some(_), None) => {
                return Err(BucketError::EnvVarNotFound {
                    var: vars::PACER_CAPACITY.to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(BucketError::EnvVarNotFound {
                    var: vars::PACER_REFILL_INTERVAL_MS.to_string(),
                })
            }
        };

        config.validate()?;
        Ok(Some(config))
    }

    /// Reject values no bucket can be built from.
    pub fn validate(&self) -> BucketResult<()> {
        match *self {
            Self::Interval {
                refill_interval_ms,
                capacity,
            } => BucketState::new(Duration::from_millis(refill_interval_ms), capacity).map(|_| ()),
            Self::Rate {
                requests_per_second,
            } => rate_interval(requests_per_second).map(|_| ()),
        }
    }

    /// Refill interval this configuration produces.
    pub fn refill_interval(&self) -> BucketResult<Duration> {
        match *self {
            Self::Interval {
                refill_interval_ms, ..
            } => Ok(Duration::from_millis(refill_interval_ms)),
            Self::Rate {
                requests_per_second,
            } => rate_interval(requests_per_second),
        }
    }

    /// Capacity this configuration produces.
    pub fn capacity(&self) -> u64 {
        match *self {
            Self::Interval { capacity, .. } => capacity,
            Self::Rate { .. } => 1,
        }
    }
}

fn env_u64(var: &str) -> BucketResult<Option<u64>> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BucketError::config(format!("{var} must be a non-negative integer, got {value:?}"))),
        Err(_) => Ok(None),
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("valid env var pattern"))
}

fn expand_env_vars(content: &str) -> BucketResult<String> {
    let mut result = content.to_string();

    for cap in env_var_pattern().captures_iter(content) {
        let var_name = &cap[1];
        let value = match (std::env::var(var_name), cap.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                return Err(BucketError::EnvVarNotFound {
                    var: var_name.to_string(),
                })
            }
        };
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
