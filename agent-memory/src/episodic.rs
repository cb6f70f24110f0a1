//! Episodic memory: an append-only event log with a similarity index.
//!
//! Recording an event appends it to the log and then indexes its embedding.
//! The two writes are separate; when indexing fails the event stays in the
//! log and the returned [`EventReceipt`] reports it as unsearchable until
//! [`EpisodicMemory::reindex_event`] succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use agent_config::PersistenceConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::embeddings::{Vectorizer, embed_checked};
use crate::index::{EmbeddingEntry, EmbeddingIndex};
use crate::persistence::{Collection, Commit};
use crate::{MemoryError, MemoryResult};

/// Key space of the append-only event log.
pub const EVENT_LOG_KEY_SPACE: &str = "em_event_log";
/// Key space of the event embedding index.
pub const EVENT_INDEX_KEY_SPACE: &str = "em_vector_index";

/// A recorded experience. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_id: String,
    agent_id: String,
    user_id: String,
    #[serde(with = "crate::timestamp")]
    timestamp: DateTime<Utc>,
    text: String,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl Event {
    /// Creates a builder for a new event stamped with the current time.
    #[must_use]
    pub fn builder(
        event_id: impl Into<String>,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> EventBuilder {
        EventBuilder {
            event_id: event_id.into(),
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            text: text.into(),
            meta: Map::new(),
        }
    }

    /// Unique event identifier.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Agent taking part in the interaction.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// User taking part in the interaction.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Creation time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Content of the interaction.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Free-form metadata.
    #[must_use]
    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }
}

/// Builder type used to assemble [`Event`] instances safely.
#[derive(Debug)]
pub struct EventBuilder {
    event_id: String,
    agent_id: String,
    user_id: String,
    timestamp: DateTime<Utc>,
    text: String,
    meta: Map<String, Value>,
}

impl EventBuilder {
    /// Overrides the creation time.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Adds a full metadata map, overwriting existing keys when duplicates occur.
    #[must_use]
    pub fn merge_meta(mut self, map: Map<String, Value>) -> Self {
        self.meta.extend(map);
        self
    }

    /// Finalises the builder.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when an identifier is blank.
    pub fn build(self) -> MemoryResult<Event> {
        if self.event_id.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("event_id must not be empty"));
        }
        if self.agent_id.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("agent_id must not be empty"));
        }
        if self.user_id.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("user_id must not be empty"));
        }
        Ok(Event {
            event_id: self.event_id,
            agent_id: self.agent_id,
            user_id: self.user_id,
            timestamp: self.timestamp,
            text: self.text,
            meta: self.meta,
        })
    }
}

/// Acknowledgement returned by [`EpisodicMemory::record_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReceipt {
    event_id: String,
    indexed: bool,
}

impl EventReceipt {
    /// Identifier of the recorded event.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// `false` when the event was logged but its embedding could not be
    /// indexed, so similarity recall will not find it.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }
}

/// Append-only episodic store.
#[derive(Debug)]
pub struct EpisodicMemory {
    log: Collection<Vec<Event>>,
    index: Collection<EmbeddingIndex>,
    vectorizer: Arc<dyn Vectorizer>,
}

impl EpisodicMemory {
    /// Creates the store on `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        vectorizer: Arc<dyn Vectorizer>,
        policy: PersistenceConfig,
    ) -> Self {
        Self {
            log: Collection::new(EVENT_LOG_KEY_SPACE, Arc::clone(&backend), policy),
            index: Collection::new(EVENT_INDEX_KEY_SPACE, backend, policy),
            vectorizer,
        }
    }

    /// Appends `event` to the log and indexes its embedding.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::DuplicateEvent`] when the identifier was already
    /// recorded and propagates failures of the log write. A failed index
    /// write does not error; it is reported through
    /// [`EventReceipt::is_indexed`].
    pub async fn record_event(&self, event: Event) -> MemoryResult<EventReceipt> {
        debug!(event_id = %event.event_id, user_id = %event.user_id, "recording episodic event");

        let logged = event.clone();
        let appended = self
            .log
            .modify(move |log| {
                if log.iter().any(|existing| existing.event_id == logged.event_id) {
                    Commit::Skip(false)
                } else {
                    log.push(logged);
                    Commit::Save(true)
                }
            })
            .await?;

        if !appended {
            return Err(MemoryError::DuplicateEvent {
                event_id: event.event_id,
            });
        }

        let indexed = match self.index_event(&event).await {
            Ok(()) => true,
            Err(err) => {
                warn!(event_id = %event.event_id, ?err, "event logged but not indexed");
                false
            }
        };

        Ok(EventReceipt {
            event_id: event.event_id,
            indexed,
        })
    }

    /// Re-computes and stores the embedding of an already logged event.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::EventNotFound`] when the event is not in the log
    /// and propagates vectorizer and persistence failures.
    pub async fn reindex_event(&self, event_id: &str) -> MemoryResult<()> {
        let event = self
            .event(event_id)
            .await?
            .ok_or_else(|| MemoryError::EventNotFound {
                event_id: event_id.to_owned(),
            })?;
        self.index_event(&event).await
    }

    /// Returns the events of `user_id` most similar to `query_text`, best
    /// match first.
    ///
    /// # Errors
    ///
    /// Propagates vectorizer and load failures.
    pub async fn recall_events(
        &self,
        user_id: &str,
        query_text: &str,
        limit: usize,
    ) -> MemoryResult<Vec<Event>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = embed_checked(self.vectorizer.as_ref(), query_text).await?;
        let ranked = self
            .index
            .read(|index| index.query(&query, limit, |entry| entry.user_id() == Some(user_id)))
            .await?;
        debug!(user_id, candidates = ranked.len(), "episodic recall ranked");

        let log = self.log.load().await?;
        let by_id: HashMap<&str, &Event> = log
            .iter()
            .filter(|event| event.user_id == user_id)
            .map(|event| (event.event_id.as_str(), event))
            .collect();

        Ok(ranked
            .iter()
            .filter_map(|candidate| by_id.get(candidate.owner_id()).map(|event| (*event).clone()))
            .collect())
    }

    /// Returns every event of `user_id` in log order.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn events_for_user(&self, user_id: &str) -> MemoryResult<Vec<Event>> {
        self.log
            .read(|log| {
                log.iter()
                    .filter(|event| event.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Looks up a single event by identifier.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn event(&self, event_id: &str) -> MemoryResult<Option<Event>> {
        self.log
            .read(|log| log.iter().find(|event| event.event_id == event_id).cloned())
            .await
    }

    async fn index_event(&self, event: &Event) -> MemoryResult<()> {
        let embedding = embed_checked(self.vectorizer.as_ref(), &event.text).await?;
        let entry = EmbeddingEntry::new(embedding, event.timestamp).with_user(event.user_id.clone());
        let owner_id = event.event_id.clone();
        self.index
            .modify(move |index| {
                index.upsert(owner_id, entry);
                Commit::Save(())
            })
            .await
    }
}
