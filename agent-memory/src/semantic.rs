//! Semantic memory: a fact graph of `(subject, relation, object)` triples and
//! an index of entity descriptions.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_config::PersistenceConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::backend::StorageBackend;
use crate::embeddings::{EmbeddingVector, Vectorizer, embed_checked};
use crate::index::rank;
use crate::matches::Matches;
use crate::persistence::{Collection, Commit};
use crate::{MemoryError, MemoryResult};

/// Key space of the fact graph.
pub const GRAPH_KEY_SPACE: &str = "sm_knowledge_graph";
/// Key space of the entity index.
pub const ENTITY_INDEX_KEY_SPACE: &str = "sm_entity_index";

/// A single fact triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    subject: String,
    relation: String,
    object: String,
}

impl Fact {
    /// Creates a fact.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when any component is blank.
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> MemoryResult<Self> {
        let fact = Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
        };
        if [&fact.subject, &fact.relation, &fact.object]
            .iter()
            .any(|part| part.trim().is_empty())
        {
            return Err(MemoryError::InvalidRecord(
                "fact subject, relation and object must not be empty",
            ));
        }
        Ok(fact)
    }

    /// Subject entity.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Relationship between subject and object.
    #[must_use]
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Object entity.
    #[must_use]
    pub fn object(&self) -> &str {
        &self.object
    }
}

/// Outcome of [`SemanticMemory::add_fact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactInsert {
    /// The triple was new and has been stored.
    Added,
    /// The identical triple already existed; nothing changed.
    Duplicate,
}

/// Indexed description of a named entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    #[serde(default)]
    entity_name: String,
    description: String,
    embedding: EmbeddingVector,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl EntityDescription {
    /// Entity name (the record key).
    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Embedding of the description.
    #[must_use]
    pub fn embedding(&self) -> &EmbeddingVector {
        &self.embedding
    }

    /// Additional structured data.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Copies the record with its name taken from the index key.
    fn keyed(&self, entity_name: &str) -> Self {
        Self {
            entity_name: entity_name.to_owned(),
            ..self.clone()
        }
    }
}

/// One hit from [`SemanticMemory::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SemanticMatch {
    /// An entity whose name or description matched.
    EntityDescription(EntityDescription),
    /// A fact whose subject or object matched.
    Fact(Fact),
}

/// Fact graph plus entity index.
#[derive(Debug)]
pub struct SemanticMemory {
    graph: Collection<Vec<Fact>>,
    entities: Collection<BTreeMap<String, EntityDescription>>,
    vectorizer: Arc<dyn Vectorizer>,
}

impl SemanticMemory {
    /// Creates the store on `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        vectorizer: Arc<dyn Vectorizer>,
        policy: PersistenceConfig,
    ) -> Self {
        Self {
            graph: Collection::new(GRAPH_KEY_SPACE, Arc::clone(&backend), policy),
            entities: Collection::new(ENTITY_INDEX_KEY_SPACE, backend, policy),
            vectorizer,
        }
    }

    /// Adds a fact unless the identical triple is already present.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] for blank components and
    /// propagates persistence failures.
    pub async fn add_fact(&self, subject: &str, relation: &str, object: &str) -> MemoryResult<FactInsert> {
        let fact = Fact::new(subject, relation, object)?;
        let outcome = self
            .graph
            .modify(move |graph| {
                if graph.contains(&fact) {
                    Commit::Skip(FactInsert::Duplicate)
                } else {
                    graph.push(fact);
                    Commit::Save(FactInsert::Added)
                }
            })
            .await?;
        debug!(subject, relation, object, ?outcome, "semantic fact insert");
        Ok(outcome)
    }

    /// Indexes or replaces the description of `entity_name`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] for a blank name and propagates
    /// vectorizer and persistence failures.
    pub async fn add_entity(
        &self,
        entity_name: &str,
        description: &str,
        metadata: Option<Map<String, Value>>,
    ) -> MemoryResult<()> {
        if entity_name.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("entity name must not be empty"));
        }
        debug!(entity = entity_name, "indexing entity description");

        let entity = EntityDescription {
            entity_name: entity_name.to_owned(),
            description: description.to_owned(),
            embedding: embed_checked(self.vectorizer.as_ref(), description).await?,
            metadata: metadata.unwrap_or_default(),
        };
        self.entities
            .modify(move |index| {
                index.insert(entity.entity_name.clone(), entity);
                Commit::Save(())
            })
            .await
    }

    /// Keyword search over entities (name or description) followed by facts
    /// (subject or object). Matching is a case-insensitive substring test;
    /// entity hits always precede fact hits.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn query(&self, text: &str) -> MemoryResult<Matches<SemanticMatch>> {
        let needle = text.to_lowercase();
        let contains = |haystack: &str| haystack.to_lowercase().contains(&needle);

        let mut results: Vec<SemanticMatch> = self
            .entities
            .read(|index| {
                index
                    .iter()
                    .filter(|(name, entity)| contains(name) || contains(&entity.description))
                    .map(|(name, entity)| SemanticMatch::EntityDescription(entity.keyed(name)))
                    .collect::<Vec<_>>()
            })
            .await?;

        let facts = self
            .graph
            .read(|graph| {
                graph
                    .iter()
                    .filter(|fact| contains(&fact.subject) || contains(&fact.object))
                    .cloned()
                    .map(SemanticMatch::Fact)
                    .collect::<Vec<_>>()
            })
            .await?;
        results.extend(facts);

        debug!(query = text, matches = results.len(), "semantic query");
        Ok(Matches::from_vec(results))
    }

    /// Returns every stored fact in insertion order.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn facts(&self) -> MemoryResult<Vec<Fact>> {
        self.graph.load().await
    }

    /// Looks up an entity description by name.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn entity(&self, entity_name: &str) -> MemoryResult<Option<EntityDescription>> {
        self.entities
            .read(|index| index.get(entity_name).map(|entity| entity.keyed(entity_name)))
            .await
    }

    /// Ranks entity descriptions by embedding similarity to `text`.
    ///
    /// # Errors
    ///
    /// Propagates vectorizer and load failures.
    pub async fn similar_entities(&self, text: &str, limit: usize) -> MemoryResult<Vec<EntityDescription>> {
        let query = embed_checked(self.vectorizer.as_ref(), text).await?;
        self.entities
            .read(|index| {
                let candidates = index
                    .iter()
                    .map(|(name, entity)| (name.as_str(), &entity.embedding));
                rank(&query, candidates, limit)
                    .iter()
                    .filter_map(|hit| {
                        let name = hit.owner_id();
                        index.get(name).map(|entity| entity.keyed(name))
                    })
                    .collect::<Vec<_>>()
            })
            .await
    }
}
