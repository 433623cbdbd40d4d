//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors detected before the scheduler ever runs. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid probe name {0:?}: must be a lowercase DNS label of at most 40 characters")]
    InvalidName(String),

    #[error("duplicate probe name: {0}")]
    DuplicateName(String),

    #[error("probe {probe}: invalid duration for {field}: {value:?}")]
    InvalidDuration {
        probe: String,
        field: String,
        value: String,
    },

    #[error("probe {probe}: {field} {value} exceeds the maximum of {max}")]
    DurationTooLong {
        probe: String,
        field: String,
        value: String,
        max: String,
    },

    #[error("probe {probe}: {field} must be greater than zero")]
    ZeroDuration { probe: String, field: String },

    #[error("probe {probe}: timeout {timeout} must be less than interval {interval}")]
    TimeoutNotBelowInterval {
        probe: String,
        timeout: String,
        interval: String,
    },

    #[error("probe {probe}: parameter {param}: {reason}")]
    InvalidParam {
        probe: String,
        param: String,
        reason: String,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}
