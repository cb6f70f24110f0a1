//! Embedding index shared by the similarity-searchable tiers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingVector;

/// Indexed embedding for one owned object (an event, entity or document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    embedding: EmbeddingVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(with = "crate::timestamp")]
    timestamp: DateTime<Utc>,
}

impl EmbeddingEntry {
    /// Creates an entry stamped with `timestamp`.
    #[must_use]
    pub fn new(embedding: EmbeddingVector, timestamp: DateTime<Utc>) -> Self {
        Self {
            embedding,
            user_id: None,
            timestamp,
        }
    }

    /// Scopes the entry to a user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Returns the embedding.
    #[must_use]
    pub fn embedding(&self) -> &EmbeddingVector {
        &self.embedding
    }

    /// Returns the owning user, if scoped.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the indexing timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A candidate returned from a similarity ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    owner_id: String,
    score: f32,
}

impl ScoredMatch {
    /// Identifier of the owning object.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Dot-product similarity to the query.
    #[must_use]
    pub fn score(&self) -> f32 {
        self.score
    }

    /// Consumes the match, returning the owner identifier.
    #[must_use]
    pub fn into_owner_id(self) -> String {
        self.owner_id
    }
}

/// Ranks `candidates` against `query` by dot product, highest first.
///
/// Ties are broken by owner identifier ascending. Candidates whose
/// dimensionality differs from the query, or whose score overflows to a
/// non-finite value, are skipped.
pub fn rank<'a, I>(query: &EmbeddingVector, candidates: I, limit: usize) -> Vec<ScoredMatch>
where
    I: IntoIterator<Item = (&'a str, &'a EmbeddingVector)>,
{
    if limit == 0 {
        return Vec::new();
    }

    let mut matches: Vec<ScoredMatch> = candidates
        .into_iter()
        .filter_map(|(owner_id, embedding)| {
            query
                .dot(embedding)
                .filter(|score| score.is_finite())
                .map(|score| ScoredMatch {
                    owner_id: owner_id.to_owned(),
                    score,
                })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.owner_id.cmp(&b.owner_id))
    });
    matches.truncate(limit);
    matches
}

/// Keyed map `owner_id -> EmbeddingEntry`; re-indexing a key overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingIndex {
    entries: BTreeMap<String, EmbeddingEntry>,
}

impl EmbeddingIndex {
    /// Inserts or replaces the entry for `owner_id`.
    pub fn upsert(&mut self, owner_id: impl Into<String>, entry: EmbeddingEntry) {
        self.entries.insert(owner_id.into(), entry);
    }

    /// Returns the entry for `owner_id`.
    #[must_use]
    pub fn get(&self, owner_id: &str) -> Option<&EmbeddingEntry> {
        self.entries.get(owner_id)
    }

    /// Returns whether `owner_id` is indexed.
    #[must_use]
    pub fn contains(&self, owner_id: &str) -> bool {
        self.entries.contains_key(owner_id)
    }

    /// Removes the entry for `owner_id`.
    pub fn remove(&mut self, owner_id: &str) -> Option<EmbeddingEntry> {
        self.entries.remove(owner_id)
    }

    /// Number of indexed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ranks entries accepted by `filter` against `query`.
    #[must_use]
    pub fn query<F>(&self, query: &EmbeddingVector, limit: usize, filter: F) -> Vec<ScoredMatch>
    where
        F: Fn(&EmbeddingEntry) -> bool,
    {
        rank(
            query,
            self.entries
                .iter()
                .filter(|(_, entry)| filter(entry))
                .map(|(owner_id, entry)| (owner_id.as_str(), entry.embedding())),
            limit,
        )
    }
}
