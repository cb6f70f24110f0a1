//! Working memory: one scratchpad per in-flight task.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_config::PersistenceConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::persistence::{Collection, Commit};
use crate::{MemoryError, MemoryResult};

/// Key space of the scratchpads.
pub const SCRATCHPAD_KEY_SPACE: &str = "wm_scratchpad";

/// State of a task being worked on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskScratchpad {
    goal: String,
    current_step: u64,
    #[serde(default)]
    intermediate_results: Vec<Value>,
}

impl TaskScratchpad {
    /// Creates a scratchpad.
    #[must_use]
    pub fn new(goal: impl Into<String>, current_step: u64, intermediate_results: Vec<Value>) -> Self {
        Self {
            goal: goal.into(),
            current_step,
            intermediate_results,
        }
    }

    /// Goal of the task.
    #[must_use]
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Step counter supplied by the caller.
    #[must_use]
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Results gathered so far, in order.
    #[must_use]
    pub fn intermediate_results(&self) -> &[Value] {
        &self.intermediate_results
    }
}

/// Scratchpads keyed by `task_id`.
#[derive(Debug)]
pub struct WorkingMemory {
    scratchpads: Collection<BTreeMap<String, TaskScratchpad>>,
}

impl WorkingMemory {
    /// Creates the store on `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, policy: PersistenceConfig) -> Self {
        Self {
            scratchpads: Collection::new(SCRATCHPAD_KEY_SPACE, backend, policy),
        }
    }

    /// Replaces the scratchpad of `task_id`. The step counter is stored as
    /// given.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] for a blank task id and
    /// propagates persistence failures.
    pub async fn update(&self, task_id: &str, scratchpad: TaskScratchpad) -> MemoryResult<()> {
        if task_id.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("task id must not be empty"));
        }
        debug!(task = task_id, step = scratchpad.current_step, "updating scratchpad");
        self.scratchpads
            .modify(move |scratchpads| {
                scratchpads.insert(task_id.to_owned(), scratchpad);
                Commit::Save(())
            })
            .await
    }

    /// Returns the scratchpad of `task_id`, if any.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn retrieve(&self, task_id: &str) -> MemoryResult<Option<TaskScratchpad>> {
        self.scratchpads
            .read(|scratchpads| scratchpads.get(task_id).cloned())
            .await
    }

    /// Deletes the scratchpad of `task_id`, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn discard(&self, task_id: &str) -> MemoryResult<bool> {
        let removed = self
            .scratchpads
            .modify(|scratchpads| match scratchpads.remove(task_id) {
                Some(_) => Commit::Save(true),
                None => Commit::Skip(false),
            })
            .await?;
        debug!(task = task_id, removed, "discarded scratchpad");
        Ok(removed)
    }

    /// Lists the ids of live scratchpads in ascending order.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn task_ids(&self) -> MemoryResult<Vec<String>> {
        self.scratchpads
            .read(|scratchpads| scratchpads.keys().cloned().collect::<Vec<_>>())
            .await
    }
}
