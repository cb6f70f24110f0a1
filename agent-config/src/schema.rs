//! Strongly typed configuration schemas.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// Default dimensionality of the placeholder embedding.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 16;

/// Behaviour when a backing document exists but cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptPolicy {
    /// Degrade to the empty default for the key space (fail-open).
    ///
    /// Retained for behavioural compatibility; a corrupt document is
    /// overwritten by the next successful write.
    #[default]
    Empty,
    /// Surface the corruption to the caller (fail-closed).
    Error,
}

/// Behaviour when persisting a document fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFailurePolicy {
    /// Return the failure to the caller as a recoverable error.
    #[default]
    Propagate,
    /// Log the failure and report success, leaving the durable copy stale.
    LogAndContinue,
}

impl FromStr for CorruptPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "empty" | "fail_open" | "fail-open" => Ok(Self::Empty),
            "error" | "fail_closed" | "fail-closed" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

impl FromStr for WriteFailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" => Ok(Self::Propagate),
            "log_and_continue" | "log-and-continue" | "log" => Ok(Self::LogAndContinue),
            _ => Err(()),
        }
    }
}

impl Display for CorruptPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::Error => f.write_str("error"),
        }
    }
}

impl Display for WriteFailurePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Propagate => f.write_str("propagate"),
            Self::LogAndContinue => f.write_str("log_and_continue"),
        }
    }
}

/// Failure handling applied by every persisted collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    on_corrupt: CorruptPolicy,
    on_write_failure: WriteFailurePolicy,
}

impl PersistenceConfig {
    /// Creates a configuration from explicit policies.
    #[must_use]
    pub const fn new(on_corrupt: CorruptPolicy, on_write_failure: WriteFailurePolicy) -> Self {
        Self {
            on_corrupt,
            on_write_failure,
        }
    }

    /// Policy applied to unparseable documents.
    #[must_use]
    pub const fn on_corrupt(self) -> CorruptPolicy {
        self.on_corrupt
    }

    /// Policy applied to failed writes.
    #[must_use]
    pub const fn on_write_failure(self) -> WriteFailurePolicy {
        self.on_write_failure
    }

    /// Overrides the corrupt-document policy.
    #[must_use]
    pub const fn with_on_corrupt(mut self, policy: CorruptPolicy) -> Self {
        self.on_corrupt = policy;
        self
    }

    /// Overrides the write-failure policy.
    #[must_use]
    pub const fn with_on_write_failure(mut self, policy: WriteFailurePolicy) -> Self {
        self.on_write_failure = policy;
        self
    }
}

/// Settings specific to the short-term conversation cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortTermConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_secs: Option<u64>,
}

impl ShortTermConfig {
    /// Returns the configured time-to-live, if any.
    #[must_use]
    pub fn ttl(self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    /// Sets the time-to-live in whole seconds.
    #[must_use]
    pub const fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

/// Top-level configuration for the memory tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    root_dir: Option<PathBuf>,
    embedding_dimensions: usize,
    persistence: PersistenceConfig,
    short_term: ShortTermConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            persistence: PersistenceConfig::default(),
            short_term: ShortTermConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Creates a configuration persisting documents beneath `root_dir`.
    #[must_use]
    pub fn file_backed(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: Some(root_dir.into()),
            ..Self::default()
        }
    }

    /// Directory holding the backing documents. `None` keeps everything in
    /// process memory.
    #[must_use]
    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }

    /// Dimensionality of the placeholder embedding.
    #[must_use]
    pub const fn embedding_dimensions(&self) -> usize {
        self.embedding_dimensions
    }

    /// Persistence failure handling.
    #[must_use]
    pub const fn persistence(&self) -> PersistenceConfig {
        self.persistence
    }

    /// Short-term cache settings.
    #[must_use]
    pub const fn short_term(&self) -> ShortTermConfig {
        self.short_term
    }

    /// Sets the root directory.
    #[must_use]
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root_dir.into());
        self
    }

    /// Sets the embedding dimensionality.
    #[must_use]
    pub fn with_embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.embedding_dimensions = dimensions;
        self
    }

    /// Replaces the persistence settings.
    #[must_use]
    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    /// Replaces the short-term cache settings.
    #[must_use]
    pub fn with_short_term(mut self, short_term: ShortTermConfig) -> Self {
        self.short_term = short_term;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the embedding dimensionality is
    /// zero, the short-term TTL is zero, or the root directory is empty.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.embedding_dimensions == 0 {
            return Err(ConfigError::invalid(
                "embedding_dimensions must be greater than zero",
            ));
        }
        if self.short_term.ttl_secs == Some(0) {
            return Err(ConfigError::invalid(
                "short_term.ttl_secs must be greater than zero when set",
            ));
        }
        if self
            .root_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(ConfigError::invalid("root_dir must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_fail_open_reads_and_propagating_writes() {
        let config = MemoryConfig::default();
        assert!(config.root_dir().is_none());
        assert_eq!(config.embedding_dimensions(), DEFAULT_EMBEDDING_DIMENSIONS);
        assert_eq!(config.persistence().on_corrupt(), CorruptPolicy::Empty);
        assert_eq!(
            config.persistence().on_write_failure(),
            WriteFailurePolicy::Propagate
        );
        assert!(config.short_term().ttl().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_dimensions() {
        let err = MemoryConfig::default()
            .with_embedding_dimensions(0)
            .validate()
            .expect_err("zero dimensions should fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_zero_ttl() {
        let config = MemoryConfig::default()
            .with_short_term(ShortTermConfig::default().with_ttl_secs(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn policies_parse_from_strings() {
        assert_eq!("fail-closed".parse::<CorruptPolicy>(), Ok(CorruptPolicy::Error));
        assert_eq!(" Empty ".parse::<CorruptPolicy>(), Ok(CorruptPolicy::Empty));
        assert_eq!(
            "log".parse::<WriteFailurePolicy>(),
            Ok(WriteFailurePolicy::LogAndContinue)
        );
        assert!("sometimes".parse::<WriteFailurePolicy>().is_err());
    }
}
