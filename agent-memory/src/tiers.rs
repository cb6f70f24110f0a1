//! Wires the six memory tiers onto one backend and vectorizer.

use std::num::NonZeroUsize;
use std::sync::Arc;

use agent_config::MemoryConfig;
use tracing::info;

use crate::backend::{FileBackend, InMemoryBackend, StorageBackend};
use crate::embeddings::{CharacterOrdinalVectorizer, Vectorizer};
use crate::episodic::EpisodicMemory;
use crate::long_term::LongTermMemory;
use crate::procedural::ProceduralMemory;
use crate::semantic::SemanticMemory;
use crate::short_term::ShortTermMemory;
use crate::working::WorkingMemory;
use crate::{MemoryError, MemoryResult};

/// Builder for [`MemoryTiers`] instances.
#[derive(Debug)]
pub struct MemoryTiersBuilder {
    config: MemoryConfig,
    vectorizer: Option<Arc<dyn Vectorizer>>,
    backend: Option<Arc<dyn StorageBackend>>,
}

impl MemoryTiersBuilder {
    /// Starts a new builder using the supplied configuration.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            vectorizer: None,
            backend: None,
        }
    }

    /// Installs a vectorizer in place of [`CharacterOrdinalVectorizer`]. Its
    /// dimensionality must match the configured one.
    #[must_use]
    pub fn with_vectorizer(mut self, vectorizer: Arc<dyn Vectorizer>) -> Self {
        self.vectorizer = Some(vectorizer);
        self
    }

    /// Installs a backend, overriding the configured `root_dir`.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Builds the [`MemoryTiers`].
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the configuration does not
    /// validate or the vectorizer dimensionality disagrees with it, and
    /// propagates I/O errors from opening the root directory.
    pub async fn build(self) -> MemoryResult<MemoryTiers> {
        self.config.validate()?;
        let dimensions = NonZeroUsize::new(self.config.embedding_dimensions())
            .ok_or_else(|| MemoryError::InvalidConfig("embedding dimensions must be non-zero".into()))?;

        let vectorizer = match self.vectorizer {
            Some(vectorizer) if vectorizer.dimensions() != dimensions.get() => {
                return Err(MemoryError::InvalidConfig(format!(
                    "vectorizer produces {} dimensions, configuration expects {dimensions}",
                    vectorizer.dimensions()
                )));
            }
            Some(vectorizer) => vectorizer,
            None => Arc::new(CharacterOrdinalVectorizer::new(dimensions)),
        };

        let backend: Arc<dyn StorageBackend> = match (self.backend, self.config.root_dir()) {
            (Some(backend), _) => backend,
            (None, Some(root)) => Arc::new(FileBackend::open(root).await?),
            (None, None) => Arc::new(InMemoryBackend::new()),
        };

        let policy = self.config.persistence();
        info!(
            root_dir = ?self.config.root_dir(),
            dimensions = dimensions.get(),
            on_corrupt = %policy.on_corrupt(),
            on_write_failure = %policy.on_write_failure(),
            "memory tiers ready"
        );

        Ok(MemoryTiers {
            episodic: Arc::new(EpisodicMemory::new(Arc::clone(&backend), Arc::clone(&vectorizer), policy)),
            semantic: Arc::new(SemanticMemory::new(Arc::clone(&backend), Arc::clone(&vectorizer), policy)),
            procedural: Arc::new(ProceduralMemory::new(Arc::clone(&backend), policy)),
            short_term: Arc::new(ShortTermMemory::new(
                Arc::clone(&backend),
                policy,
                self.config.short_term(),
            )),
            working: Arc::new(WorkingMemory::new(Arc::clone(&backend), policy)),
            long_term: Arc::new(LongTermMemory::new(Arc::clone(&backend), vectorizer, policy)),
            backend,
        })
    }
}

/// Handle to every memory tier. Cloning shares the underlying stores.
#[derive(Debug, Clone)]
pub struct MemoryTiers {
    backend: Arc<dyn StorageBackend>,
    episodic: Arc<EpisodicMemory>,
    semantic: Arc<SemanticMemory>,
    procedural: Arc<ProceduralMemory>,
    short_term: Arc<ShortTermMemory>,
    working: Arc<WorkingMemory>,
    long_term: Arc<LongTermMemory>,
}

impl MemoryTiers {
    /// Creates a builder for the tiers.
    #[must_use]
    pub fn builder(config: MemoryConfig) -> MemoryTiersBuilder {
        MemoryTiersBuilder::new(config)
    }

    /// Returns the shared backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Returns the episodic tier.
    #[must_use]
    pub fn episodic(&self) -> &Arc<EpisodicMemory> {
        &self.episodic
    }

    /// Returns the semantic tier.
    #[must_use]
    pub fn semantic(&self) -> &Arc<SemanticMemory> {
        &self.semantic
    }

    /// Returns the procedural tier.
    #[must_use]
    pub fn procedural(&self) -> &Arc<ProceduralMemory> {
        &self.procedural
    }

    /// Returns the short-term tier.
    #[must_use]
    pub fn short_term(&self) -> &Arc<ShortTermMemory> {
        &self.short_term
    }

    /// Returns the working tier.
    #[must_use]
    pub fn working(&self) -> &Arc<WorkingMemory> {
        &self.working
    }

    /// Returns the long-term tier.
    #[must_use]
    pub fn long_term(&self) -> &Arc<LongTermMemory> {
        &self.long_term
    }
}
