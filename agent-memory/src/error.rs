//! Error types for the memory subsystem.

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by memory components.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The provided configuration was invalid.
    #[error("invalid memory configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O failure while reading or writing backing documents.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// A backing document exists but could not be parsed and the store is
    /// configured to fail closed.
    #[error("document `{key_space}` is corrupt: {source}")]
    CorruptDocument {
        /// Key space of the offending document.
        key_space: String,
        /// Parser error.
        source: SerdeError,
    },
    /// Persisting a document failed.
    #[error("failed to persist `{key_space}`: {source}")]
    Persistence {
        /// Key space that could not be written.
        key_space: String,
        /// Underlying failure.
        source: Box<MemoryError>,
    },
    /// Memory record failed validation.
    #[error("invalid memory record: {0}")]
    InvalidRecord(&'static str),
    /// The vectorizer could not produce an embedding.
    #[error("embedding failed: {reason}")]
    Embedding {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// An event with the same identifier has already been recorded.
    #[error("event `{event_id}` has already been recorded")]
    DuplicateEvent {
        /// Identifier of the rejected event.
        event_id: String,
    },
    /// No event with the identifier exists in the log.
    #[error("event `{event_id}` not found")]
    EventNotFound {
        /// Identifier that was looked up.
        event_id: String,
    },
    /// No skill is registered under the name.
    #[error("skill `{skill}` not found")]
    SkillNotFound {
        /// Name that was looked up.
        skill: String,
    },
    /// The skill exists but not at the requested version.
    #[error("version `{version}` for skill `{skill}` not found")]
    SkillVersionNotFound {
        /// Name of the skill.
        skill: String,
        /// Version that was looked up.
        version: String,
    },
}

impl MemoryError {
    /// Helper to construct embedding errors from string-like values.
    #[must_use]
    pub fn embedding(reason: impl Into<String>) -> Self {
        Self::Embedding {
            reason: reason.into(),
        }
    }

    /// Wraps a failed write for `key_space`.
    #[must_use]
    pub fn persistence(key_space: impl Into<String>, source: MemoryError) -> Self {
        Self::Persistence {
            key_space: key_space.into(),
            source: Box::new(source),
        }
    }

    /// Returns `true` for lookups that found nothing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EventNotFound { .. } | Self::SkillNotFound { .. } | Self::SkillVersionNotFound { .. }
        )
    }
}

impl From<agent_config::ConfigError> for MemoryError {
    fn from(value: agent_config::ConfigError) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
