//! Configuration loader implementations.
//!
//! Configuration is read from a JSON document and then adjusted by
//! `AGENT_MEMORY_*` environment variables.

use std::path::Path;

use tracing::debug;

use crate::schema::{CorruptPolicy, MemoryConfig, ShortTermConfig, WriteFailurePolicy};
use crate::{ConfigError, ConfigResult};

/// Overrides the root directory for file-backed documents.
pub const ENV_ROOT: &str = "AGENT_MEMORY_ROOT";
/// Overrides the embedding dimensionality.
pub const ENV_EMBEDDING_DIMENSIONS: &str = "AGENT_MEMORY_EMBEDDING_DIMENSIONS";
/// Overrides the corrupt-document policy (`empty` or `error`).
pub const ENV_ON_CORRUPT: &str = "AGENT_MEMORY_ON_CORRUPT";
/// Overrides the write-failure policy (`propagate` or `log_and_continue`).
pub const ENV_ON_WRITE_FAILURE: &str = "AGENT_MEMORY_ON_WRITE_FAILURE";
/// Overrides the short-term buffer TTL in seconds.
pub const ENV_SHORT_TERM_TTL_SECS: &str = "AGENT_MEMORY_SHORT_TERM_TTL_SECS";

impl MemoryConfig {
    /// Parses a configuration from a JSON string and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise the
    /// errors of [`MemoryConfig::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded memory configuration");
        Self::from_json_str(&raw)
    }

    /// Applies `AGENT_MEMORY_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// See [`MemoryConfig::apply_overrides`].
    pub fn apply_env_overrides(self) -> ConfigResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides resolved through `lookup`, then re-validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] when a value cannot be parsed
    /// and [`ConfigError::Invalid`] when the result fails validation.
    pub fn apply_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT).filter(|value| !value.trim().is_empty()) {
            self = self.with_root_dir(root);
        }

        if let Some(raw) = lookup(ENV_EMBEDDING_DIMENSIONS) {
            let dimensions = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid_override(ENV_EMBEDDING_DIMENSIONS, &raw))?;
            self = self.with_embedding_dimensions(dimensions);
        }

        if let Some(raw) = lookup(ENV_ON_CORRUPT) {
            let policy = raw
                .parse::<CorruptPolicy>()
                .map_err(|()| invalid_override(ENV_ON_CORRUPT, &raw))?;
            let persistence = self.persistence().with_on_corrupt(policy);
            self = self.with_persistence(persistence);
        }

        if let Some(raw) = lookup(ENV_ON_WRITE_FAILURE) {
            let policy = raw
                .parse::<WriteFailurePolicy>()
                .map_err(|()| invalid_override(ENV_ON_WRITE_FAILURE, &raw))?;
            let persistence = self.persistence().with_on_write_failure(policy);
            self = self.with_persistence(persistence);
        }

        if let Some(raw) = lookup(ENV_SHORT_TERM_TTL_SECS) {
            let ttl = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid_override(ENV_SHORT_TERM_TTL_SECS, &raw))?;
            self = self.with_short_term(ShortTermConfig::default().with_ttl_secs(ttl));
        }

        self.validate()?;
        Ok(self)
    }
}

fn invalid_override(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidOverride {
        key,
        value: value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_partial_json_with_defaults() {
        let config = MemoryConfig::from_json_str(
            r#"{ "root_dir": "/var/lib/agent", "persistence": { "on_corrupt": "error" } }"#,
        )
        .unwrap();

        assert_eq!(config.root_dir(), Some(PathBuf::from("/var/lib/agent").as_path()));
        assert_eq!(config.embedding_dimensions(), 16);
        assert_eq!(config.persistence().on_corrupt(), CorruptPolicy::Error);
        assert_eq!(
            config.persistence().on_write_failure(),
            WriteFailurePolicy::Propagate
        );
    }

    #[test]
    fn rejects_malformed_json() {
        let err = MemoryConfig::from_json_str("{ not json").expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn rejects_invalid_json_values() {
        let err = MemoryConfig::from_json_str(r#"{ "embedding_dimensions": 0 }"#)
            .expect_err("zero dimensions should fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn reads_json_file() {
        let mut path = std::env::temp_dir();
        path.push(format!("memory-config-{}.json", Uuid::new_v4()));
        std::fs::write(&path, r#"{ "short_term": { "ttl_secs": 30 } }"#).unwrap();

        let config = MemoryConfig::from_json_file(&path).unwrap();
        assert_eq!(config.short_term().ttl(), Some(Duration::from_secs(30)));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = MemoryConfig::from_json_file("/nonexistent/agent-memory.json")
            .expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = MemoryConfig::default()
            .apply_overrides(lookup(&[
                (ENV_ROOT, "/tmp/agent-memory"),
                (ENV_EMBEDDING_DIMENSIONS, "32"),
                (ENV_ON_CORRUPT, "error"),
                (ENV_ON_WRITE_FAILURE, "log_and_continue"),
                (ENV_SHORT_TERM_TTL_SECS, "120"),
            ]))
            .unwrap();

        assert_eq!(
            config.root_dir(),
            Some(PathBuf::from("/tmp/agent-memory").as_path())
        );
        assert_eq!(config.embedding_dimensions(), 32);
        assert_eq!(config.persistence().on_corrupt(), CorruptPolicy::Error);
        assert_eq!(
            config.persistence().on_write_failure(),
            WriteFailurePolicy::LogAndContinue
        );
        assert_eq!(config.short_term().ttl(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn unparseable_override_is_rejected() {
        let err = MemoryConfig::default()
            .apply_overrides(lookup(&[(ENV_EMBEDDING_DIMENSIONS, "many")]))
            .expect_err("non-numeric dimensions should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidOverride { key, .. } if key == ENV_EMBEDDING_DIMENSIONS
        ));
    }
}
