//! Embedding vectors and the vectorizer interface shared across memory tiers.

use std::num::NonZeroUsize;
use std::sync::Arc;

use agent_config::schema::DEFAULT_EMBEDDING_DIMENSIONS;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{MemoryError, MemoryResult};

/// Wrapper type around an immutable floating-point embedding.
#[derive(Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Creates a new embedding from owned values.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the supplied vector is empty
    /// or contains non-finite values.
    pub fn new(values: Vec<f32>) -> MemoryResult<Self> {
        if values.is_empty() {
            return Err(MemoryError::InvalidRecord(
                "embedding vector must not be empty",
            ));
        }
        if !values.iter().all(|value| value.is_finite()) {
            return Err(MemoryError::InvalidRecord(
                "embedding vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: Arc::<[f32]>::from(values.into_boxed_slice()),
        })
    }

    /// Returns an immutable view of the embedding data.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality of the embedding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always `false`; [`EmbeddingVector::new`] rejects empty inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Dot-product similarity, or `None` when the dimensionalities differ.
    #[must_use]
    pub fn dot(&self, other: &Self) -> Option<f32> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| a * b)
                .sum(),
        )
    }
}

impl std::fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimensions", &self.len())
            .finish()
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EmbeddingVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Self::new(values).map_err(serde::de::Error::custom)
    }
}

/// Turns text into a fixed-length embedding.
///
/// Implementations must be deterministic for a given input and always return
/// vectors of [`Vectorizer::dimensions`] length.
#[async_trait]
pub trait Vectorizer: Send + Sync {
    /// Dimensionality of every vector produced.
    fn dimensions(&self) -> usize;

    /// Embeds `text`.
    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector>;
}

/// Embeds `text` and checks the result against the advertised dimensionality.
pub(crate) async fn embed_checked(
    vectorizer: &dyn Vectorizer,
    text: &str,
) -> MemoryResult<EmbeddingVector> {
    let embedding = vectorizer.embed(text).await?;
    if embedding.len() != vectorizer.dimensions() {
        return Err(MemoryError::embedding(format!(
            "vectorizer produced {} dimensions, expected {}",
            embedding.len(),
            vectorizer.dimensions()
        )));
    }
    Ok(embedding)
}

impl std::fmt::Debug for dyn Vectorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vectorizer")
            .field("dimensions", &self.dimensions())
            .finish()
    }
}

/// Placeholder vectorizer mapping the first N characters to their code
/// points, padding short inputs with spaces.
#[derive(Debug, Clone, Copy)]
pub struct CharacterOrdinalVectorizer {
    dimensions: NonZeroUsize,
}

impl CharacterOrdinalVectorizer {
    /// Creates a vectorizer producing `dimensions`-length vectors.
    #[must_use]
    pub const fn new(dimensions: NonZeroUsize) -> Self {
        Self { dimensions }
    }

    /// Embeds synchronously; the async trait method delegates here.
    // Code points fit in the 24-bit f32 mantissa.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let width = self.dimensions.get();
        text.chars()
            .chain(std::iter::repeat(' '))
            .take(width)
            .map(|c| u32::from(c) as f32)
            .collect()
    }
}

const DEFAULT_DIMENSIONS: NonZeroUsize =
    NonZeroUsize::MIN.saturating_add(DEFAULT_EMBEDDING_DIMENSIONS - 1);

impl Default for CharacterOrdinalVectorizer {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Vectorizer for CharacterOrdinalVectorizer {
    fn dimensions(&self) -> usize {
        self.dimensions.get()
    }

    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector> {
        EmbeddingVector::new(self.embed_text(text))
    }
}
