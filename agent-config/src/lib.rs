//! Configuration management for tiered agent memory.
//!
//! [`MemoryConfig`] describes where each memory tier persists its documents,
//! how the persistence layer reacts to corrupt or unwritable backing stores,
//! and the parameters of the placeholder vectorizer.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod loader;
pub mod schema;

/// Error type and result alias for configuration handling.
pub use error::{ConfigError, ConfigResult};
/// Strongly typed configuration schema.
pub use schema::{
    CorruptPolicy, MemoryConfig, PersistenceConfig, ShortTermConfig, WriteFailurePolicy,
};
