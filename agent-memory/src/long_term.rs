//! Long-term memory: durable user preferences and an index of learned
//! documents.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_config::PersistenceConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::embeddings::{EmbeddingVector, Vectorizer, embed_checked};
use crate::index::rank;
use crate::matches::Matches;
use crate::persistence::{Collection, Commit};
use crate::{MemoryError, MemoryResult};

/// Key space of the preference table.
pub const PREFERENCES_KEY_SPACE: &str = "ltm_preferences";
/// Key space of the document index.
pub const DOCUMENTS_KEY_SPACE: &str = "ltm_documents";

type PreferenceTable = BTreeMap<String, BTreeMap<String, Preference>>;
type DocumentTable = BTreeMap<String, Document>;

/// A stored preference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    value: Value,
    #[serde(with = "crate::timestamp")]
    updated_at: DateTime<Utc>,
}

impl Preference {
    /// The stored payload. May itself be `null`.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Time of the last write.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Consumes the preference, returning the payload.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Reference to a document held in an external object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    doc_id: String,
    #[serde(rename = "s3_uri")]
    uri: String,
    summary: String,
    embedding: EmbeddingVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(with = "crate::timestamp")]
    indexed_at: DateTime<Utc>,
}

impl Document {
    /// Unique document identifier.
    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Object-store location of the document body.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Summary used for search.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Embedding of the summary.
    #[must_use]
    pub fn embedding(&self) -> &EmbeddingVector {
        &self.embedding
    }

    /// Owning user; `None` means visible to everyone.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Time of the last (re-)index.
    #[must_use]
    pub fn indexed_at(&self) -> DateTime<Utc> {
        self.indexed_at
    }

    /// Copies the record with its identifier taken from the table key,
    /// which is authoritative for documents indexed without a `doc_id` field.
    fn keyed(&self, doc_id: &str) -> Self {
        Self {
            doc_id: doc_id.to_owned(),
            ..self.clone()
        }
    }

    fn visible_to(&self, user_id: Option<&str>) -> bool {
        match (user_id, self.user_id.as_deref()) {
            (Some(requester), Some(owner)) => requester == owner,
            _ => true,
        }
    }
}

/// Durable store for preferences and learned documents.
#[derive(Debug)]
pub struct LongTermMemory {
    preferences: Collection<PreferenceTable>,
    documents: Collection<DocumentTable>,
    vectorizer: Arc<dyn Vectorizer>,
}

impl LongTermMemory {
    /// Creates the store on `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        vectorizer: Arc<dyn Vectorizer>,
        policy: PersistenceConfig,
    ) -> Self {
        Self {
            preferences: Collection::new(PREFERENCES_KEY_SPACE, Arc::clone(&backend), policy),
            documents: Collection::new(DOCUMENTS_KEY_SPACE, backend, policy),
            vectorizer,
        }
    }

    /// Stores `value` under `(user_id, key)`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] for blank identifiers and
    /// propagates persistence failures.
    pub async fn save_preference(&self, user_id: &str, key: &str, value: Value) -> MemoryResult<()> {
        if user_id.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("user_id must not be empty"));
        }
        if key.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("preference key must not be empty"));
        }
        debug!(user_id, key, "saving preference");

        let preference = Preference {
            value,
            updated_at: Utc::now(),
        };
        self.preferences
            .modify(|table| {
                table
                    .entry(user_id.to_owned())
                    .or_default()
                    .insert(key.to_owned(), preference);
                Commit::Save(())
            })
            .await
    }

    /// Looks up a preference. `None` means the key was never set, as opposed
    /// to a stored `null`.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn get_preference(&self, user_id: &str, key: &str) -> MemoryResult<Option<Preference>> {
        self.preferences
            .read(|table| table.get(user_id).and_then(|prefs| prefs.get(key)).cloned())
            .await
    }

    /// Removes a preference, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn delete_preference(&self, user_id: &str, key: &str) -> MemoryResult<bool> {
        self.preferences
            .modify(|table| {
                let Some(prefs) = table.get_mut(user_id) else {
                    return Commit::Skip(false);
                };
                if prefs.remove(key).is_none() {
                    return Commit::Skip(false);
                }
                if prefs.is_empty() {
                    table.remove(user_id);
                }
                Commit::Save(true)
            })
            .await
    }

    /// Indexes a document by `doc_id`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] for a blank `doc_id` and
    /// propagates vectorizer and persistence failures.
    pub async fn store_document(
        &self,
        doc_id: &str,
        uri: &str,
        summary: &str,
        user_id: Option<&str>,
    ) -> MemoryResult<()> {
        if doc_id.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("doc_id must not be empty"));
        }
        debug!(doc_id, "indexing long-term document");

        let embedding = embed_checked(self.vectorizer.as_ref(), summary).await?;
        let document = Document {
            doc_id: doc_id.to_owned(),
            uri: uri.to_owned(),
            summary: summary.to_owned(),
            embedding,
            user_id: user_id.map(str::to_owned),
            indexed_at: Utc::now(),
        };
        self.documents
            .modify(|table| {
                table.insert(document.doc_id.clone(), document);
                Commit::Save(())
            })
            .await
    }

    /// Looks up a document by identifier.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn document(&self, doc_id: &str) -> MemoryResult<Option<Document>> {
        self.documents
            .read(|table| table.get(doc_id).map(|doc| doc.keyed(doc_id)))
            .await
    }

    /// Case-insensitive substring search over document summaries.
    ///
    /// With `user_id`, documents owned by other users are excluded while
    /// unowned documents remain visible.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn find_documents(
        &self,
        query: &str,
        user_id: Option<&str>,
    ) -> MemoryResult<Matches<Document>> {
        let needle = query.to_lowercase();
        let found = self
            .documents
            .read(|table| {
                table
                    .iter()
                    .filter(|(_, doc)| doc.visible_to(user_id))
                    .filter(|(_, doc)| doc.summary.to_lowercase().contains(&needle))
                    .map(|(doc_id, doc)| doc.keyed(doc_id))
                    .collect::<Vec<_>>()
            })
            .await?;
        debug!(query, matches = found.len(), "long-term document search");
        Ok(Matches::from_vec(found))
    }

    /// Ranks visible documents by embedding similarity to `query`.
    ///
    /// # Errors
    ///
    /// Propagates vectorizer and load failures.
    pub async fn similar_documents(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> MemoryResult<Vec<Document>> {
        let query = embed_checked(self.vectorizer.as_ref(), query).await?;
        self.documents
            .read(|table| {
                let visible = table
                    .iter()
                    .filter(|(_, doc)| doc.visible_to(user_id))
                    .map(|(doc_id, doc)| (doc_id.as_str(), &doc.embedding));
                rank(&query, visible, limit)
                    .iter()
                    .filter_map(|hit| table.get(hit.owner_id()).map(|doc| doc.keyed(hit.owner_id())))
                    .collect::<Vec<_>>()
            })
            .await
    }
}
