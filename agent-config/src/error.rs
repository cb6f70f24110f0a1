//! Error definitions for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating memory configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file `{}`: {source}", path.display())]
    Io {
        /// Path of the configuration file.
        path: PathBuf,
        /// Source [`std::io::Error`].
        source: std::io::Error,
    },

    /// Configuration document was not valid JSON for the schema.
    #[error("failed to parse configuration: {source}")]
    Parse {
        /// Source [`serde_json::Error`].
        #[from]
        source: serde_json::Error,
    },

    /// An environment override carried a value that could not be interpreted.
    #[error("invalid value `{value}` for `{key}`")]
    InvalidOverride {
        /// Environment variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// Configuration parsed but failed validation.
    #[error("invalid memory configuration: {reason}")]
    Invalid {
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl ConfigError {
    /// Helper to construct validation errors from string-like values.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}
