//! Short-term memory: per-conversation interaction buffers with optional
//! time-to-live.
//!
//! The cache document maps each conversation id to its list of interactions.
//! A buffer expires once its newest timestamped interaction is older than the
//! configured TTL; buffers without any timestamp never expire.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_config::{PersistenceConfig, ShortTermConfig};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::MemoryResult;
use crate::backend::StorageBackend;
use crate::persistence::{Collection, Commit};

/// Key space of the conversation cache.
pub const CACHE_KEY_SPACE: &str = "stm_cache";

/// One turn of a conversation.
///
/// Stored as a flat JSON object. Keys other than `role`, `content` and
/// `timestamp` are kept as-is in [`Interaction::extra`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::timestamp::option"
    )]
    timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Interaction {
    /// Creates an interaction stamped with the current time.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Some(Utc::now()),
            extra: Map::new(),
        }
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attaches an additional field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Speaker role, e.g. `user` or `assistant`.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Message content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// When the interaction happened, if recorded.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Fields beyond role, content and timestamp.
    #[must_use]
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Conversation cache keyed by `conversation_id`.
#[derive(Debug)]
pub struct ShortTermMemory {
    cache: Collection<BTreeMap<String, Vec<Interaction>>>,
    ttl: Option<TimeDelta>,
}

impl ShortTermMemory {
    /// Creates the cache on `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        policy: PersistenceConfig,
        config: ShortTermConfig,
    ) -> Self {
        let ttl = config.ttl().and_then(|ttl| match TimeDelta::from_std(ttl) {
            Ok(ttl) => Some(ttl),
            Err(_) => {
                warn!(ttl_secs = ttl.as_secs(), "short-term ttl out of range, buffers never expire");
                None
            }
        });
        Self {
            cache: Collection::new(CACHE_KEY_SPACE, backend, policy),
            ttl,
        }
    }

    /// Replaces the buffer of `conversation_id` with `interactions`.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn store(&self, conversation_id: &str, interactions: Vec<Interaction>) -> MemoryResult<()> {
        debug!(conversation = conversation_id, turns = interactions.len(), "storing conversation buffer");
        self.cache
            .modify(move |cache| {
                cache.insert(conversation_id.to_owned(), interactions);
                Commit::Save(())
            })
            .await
    }

    /// Returns the buffered interactions. Unknown and expired conversations
    /// both yield an empty sequence.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn retrieve(&self, conversation_id: &str) -> MemoryResult<Vec<Interaction>> {
        let now = Utc::now();
        self.cache
            .read(|cache| {
                cache
                    .get(conversation_id)
                    .filter(|buffer| !self.is_expired(buffer, now))
                    .cloned()
                    .unwrap_or_default()
            })
            .await
    }

    /// Deletes the buffer of `conversation_id`, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn clear(&self, conversation_id: &str) -> MemoryResult<bool> {
        let removed = self
            .cache
            .modify(|cache| match cache.remove(conversation_id) {
                Some(_) => Commit::Save(true),
                None => Commit::Skip(false),
            })
            .await?;
        debug!(conversation = conversation_id, removed, "cleared conversation buffer");
        Ok(removed)
    }

    /// Drops every expired buffer and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn purge_expired(&self) -> MemoryResult<usize> {
        if self.ttl.is_none() {
            return Ok(0);
        }
        let now = Utc::now();
        let purged = self
            .cache
            .modify(|cache| {
                let before = cache.len();
                cache.retain(|_, buffer| !self.is_expired(buffer, now));
                match before - cache.len() {
                    0 => Commit::Skip(0),
                    purged => Commit::Save(purged),
                }
            })
            .await?;
        if purged > 0 {
            debug!(purged, "purged expired conversation buffers");
        }
        Ok(purged)
    }

    fn is_expired(&self, buffer: &[Interaction], now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        buffer
            .iter()
            .filter_map(Interaction::timestamp)
            .max()
            .and_then(|newest| newest.checked_add_signed(ttl))
            .is_some_and(|expires_at| expires_at <= now)
    }
}
