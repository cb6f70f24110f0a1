//! Layered memory tiers for agents.
//!
//! Six independent stores share one [`StorageBackend`] and one [`Vectorizer`]:
//! episodic events with similarity recall, a semantic fact graph, a versioned
//! procedural skill registry, short-term conversation buffers, working-memory
//! scratchpads and long-term preferences and documents. [`MemoryTiers`] wires
//! them from a [`MemoryConfig`](agent_config::MemoryConfig).

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod timestamp;

pub mod backend;
pub mod embeddings;
pub mod episodic;
pub mod index;
pub mod long_term;
pub mod matches;
pub mod persistence;
pub mod procedural;
pub mod semantic;
pub mod short_term;
pub mod tiers;
pub mod working;

pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use embeddings::{CharacterOrdinalVectorizer, EmbeddingVector, Vectorizer};
pub use episodic::{EpisodicMemory, Event, EventBuilder, EventReceipt};
pub use error::{MemoryError, MemoryResult};
pub use long_term::{Document, LongTermMemory, Preference};
pub use matches::Matches;
pub use procedural::{Execution, ProceduralMemory, SkillRecord, SkillRegistration, VersionSelector};
pub use semantic::{EntityDescription, Fact, FactInsert, SemanticMatch, SemanticMemory};
pub use short_term::{Interaction, ShortTermMemory};
pub use tiers::{MemoryTiers, MemoryTiersBuilder};
pub use working::{TaskScratchpad, WorkingMemory};
