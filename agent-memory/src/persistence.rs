//! Typed load/save access to a single persisted key space.

use std::marker::PhantomData;
use std::sync::Arc;

use agent_config::{CorruptPolicy, PersistenceConfig, WriteFailurePolicy};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::{MemoryError, MemoryResult};

/// Outcome of a [`Collection::modify`] closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit<R> {
    /// The document changed and must be written back.
    Save(R),
    /// The document is unchanged; skip the write.
    Skip(R),
}

/// A persisted document whose shape is `T` (a keyed map or a sequence).
///
/// Every operation runs under the mutex the backend hands out for the key
/// space, so a load/mutate/save cycle is a single critical section and
/// concurrent writers never lose each other's updates, whether they share a
/// handle or hold separate handles on the same document.
pub struct Collection<T> {
    key_space: String,
    backend: Arc<dyn StorageBackend>,
    policy: PersistenceConfig,
    lock: Arc<Mutex<()>>,
    _shape: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("key_space", &self.key_space)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T> Collection<T>
where
    T: Default + Serialize + DeserializeOwned + Send + Sync,
{
    /// Creates a handle for `key_space` on the given backend.
    #[must_use]
    pub fn new(
        key_space: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        policy: PersistenceConfig,
    ) -> Self {
        let key_space = key_space.into();
        let lock = backend.key_space_lock(&key_space);
        Self {
            key_space,
            backend,
            policy,
            lock,
            _shape: PhantomData,
        }
    }

    /// Returns the key space name.
    #[must_use]
    pub fn key_space(&self) -> &str {
        &self.key_space
    }

    /// Loads the full document, falling back to the empty default when the
    /// document does not exist.
    ///
    /// # Errors
    ///
    /// With [`CorruptPolicy::Error`], returns [`MemoryError::CorruptDocument`]
    /// for unparseable content and the backend error for unreadable content.
    pub async fn load(&self) -> MemoryResult<T> {
        let _guard = self.lock.lock().await;
        self.load_unlocked().await
    }

    /// Replaces the full document.
    ///
    /// # Errors
    ///
    /// With [`WriteFailurePolicy::Propagate`], returns
    /// [`MemoryError::Persistence`] when the write fails.
    pub async fn save(&self, value: &T) -> MemoryResult<()> {
        let _guard = self.lock.lock().await;
        self.save_unlocked(value).await
    }

    /// Runs `f` against the current document.
    ///
    /// # Errors
    ///
    /// Propagates load failures, see [`Collection::load`].
    pub async fn read<R, F>(&self, f: F) -> MemoryResult<R>
    where
        F: FnOnce(&T) -> R + Send,
    {
        let _guard = self.lock.lock().await;
        let document = self.load_unlocked().await?;
        Ok(f(&document))
    }

    /// Loads the document, applies `f` and writes it back when `f` returns
    /// [`Commit::Save`].
    ///
    /// # Errors
    ///
    /// Propagates load failures and, depending on the write policy, write
    /// failures.
    pub async fn modify<R, F>(&self, f: F) -> MemoryResult<R>
    where
        F: FnOnce(&mut T) -> Commit<R> + Send,
        R: Send,
    {
        let _guard = self.lock.lock().await;
        let mut document = self.load_unlocked().await?;
        match f(&mut document) {
            Commit::Save(result) => {
                self.save_unlocked(&document).await?;
                Ok(result)
            }
            Commit::Skip(result) => Ok(result),
        }
    }

    async fn load_unlocked(&self) -> MemoryResult<T> {
        let raw = match self.backend.read(&self.key_space).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(T::default()),
            Err(err) => {
                return match self.policy.on_corrupt() {
                    CorruptPolicy::Empty => {
                        warn!(key_space = %self.key_space, ?err, "unreadable document, using empty default");
                        Ok(T::default())
                    }
                    CorruptPolicy::Error => Err(err),
                };
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        match serde_json::from_slice(&raw) {
            Ok(document) => Ok(document),
            Err(source) => match self.policy.on_corrupt() {
                CorruptPolicy::Empty => {
                    warn!(key_space = %self.key_space, error = %source, "corrupt document, using empty default");
                    Ok(T::default())
                }
                CorruptPolicy::Error => Err(MemoryError::CorruptDocument {
                    key_space: self.key_space.clone(),
                    source,
                }),
            },
        }
    }

    async fn save_unlocked(&self, value: &T) -> MemoryResult<()> {
        let written = match serde_json::to_vec_pretty(value) {
            Ok(encoded) => self.backend.write(&self.key_space, &encoded).await,
            Err(err) => Err(err.into()),
        };

        match written {
            Ok(()) => {
                debug!(key_space = %self.key_space, "document persisted");
                Ok(())
            }
            Err(err) => match self.policy.on_write_failure() {
                WriteFailurePolicy::Propagate => {
                    Err(MemoryError::persistence(self.key_space.clone(), err))
                }
                WriteFailurePolicy::LogAndContinue => {
                    warn!(key_space = %self.key_space, ?err, "failed to persist document; continuing");
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::backend::InMemoryBackend;

    /// Backend whose writes can be switched to fail.
    #[derive(Default)]
    pub(crate) struct FlakyBackend {
        inner: InMemoryBackend,
        fail_writes_for: std::sync::Mutex<Vec<String>>,
        fail_all: AtomicBool,
    }

    impl FlakyBackend {
        pub(crate) fn fail_all_writes(&self, fail: bool) {
            self.fail_all.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn fail_writes_to(&self, key_space: &str) {
            self.fail_writes_for
                .lock()
                .unwrap()
                .push(key_space.to_owned());
        }

        pub(crate) fn heal(&self) {
            self.fail_all.store(false, Ordering::SeqCst);
            self.fail_writes_for.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        async fn read(&self, key_space: &str) -> MemoryResult<Option<Vec<u8>>> {
            self.inner.read(key_space).await
        }

        async fn write(&self, key_space: &str, contents: &[u8]) -> MemoryResult<()> {
            let targeted = self
                .fail_writes_for
                .lock()
                .unwrap()
                .iter()
                .any(|candidate| candidate == key_space);
            if targeted || self.fail_all.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.write(key_space, contents).await
        }
    }

    type Doc = BTreeMap<String, u32>;

    fn collection(backend: Arc<dyn StorageBackend>, policy: PersistenceConfig) -> Collection<Doc> {
        Collection::new("test_doc", backend, policy)
    }

    #[tokio::test]
    async fn missing_document_loads_as_default() {
        let docs = collection(Arc::new(InMemoryBackend::new()), PersistenceConfig::default());
        assert!(docs.load().await.unwrap().is_empty());

        let seq: Collection<Vec<String>> = Collection::new(
            "test_seq",
            Arc::new(InMemoryBackend::new()),
            PersistenceConfig::default(),
        );
        assert!(seq.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn modify_persists_only_on_save() {
        let backend = Arc::new(InMemoryBackend::new());
        let docs = collection(backend.clone(), PersistenceConfig::default());

        let skipped = docs
            .modify(|doc| {
                doc.insert("ignored".into(), 1);
                Commit::Skip(false)
            })
            .await
            .unwrap();
        assert!(!skipped);
        assert!(backend.is_empty().await);

        docs.modify(|doc| {
            doc.insert("kept".into(), 2);
            Commit::Save(())
        })
        .await
        .unwrap();

        let loaded = docs.load().await.unwrap();
        assert_eq!(loaded.get("kept"), Some(&2));
        assert!(!loaded.contains_key("ignored"));
    }

    #[tokio::test]
    async fn corrupt_document_fails_open_by_default() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.write("test_doc", b"{ not json").await.unwrap();

        let docs = collection(backend, PersistenceConfig::default());
        assert!(docs.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_document_fails_closed_when_configured() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.write("test_doc", b"[1, 2").await.unwrap();

        let docs = collection(
            backend,
            PersistenceConfig::default().with_on_corrupt(CorruptPolicy::Error),
        );
        let err = docs.load().await.expect_err("corrupt document should fail");
        assert!(matches!(err, MemoryError::CorruptDocument { key_space, .. } if key_space == "test_doc"));
    }

    #[tokio::test]
    async fn write_failure_propagates_by_default() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_all_writes(true);

        let docs = collection(backend, PersistenceConfig::default());
        let err = docs
            .save(&Doc::from([("a".to_owned(), 1)]))
            .await
            .expect_err("write failure should propagate");
        assert!(matches!(err, MemoryError::Persistence { .. }));
    }

    #[tokio::test]
    async fn write_failure_is_swallowed_in_log_mode() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_all_writes(true);

        let docs = collection(
            backend.clone(),
            PersistenceConfig::default().with_on_write_failure(WriteFailurePolicy::LogAndContinue),
        );
        docs.save(&Doc::from([("a".to_owned(), 1)])).await.unwrap();

        backend.heal();
        assert!(docs.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_modifications_are_serialised() {
        let docs = Arc::new(collection(
            Arc::new(InMemoryBackend::new()),
            PersistenceConfig::default(),
        ));

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let docs = Arc::clone(&docs);
            handles.push(tokio::spawn(async move {
                docs.modify(move |doc| {
                    doc.insert(format!("k{i}"), i);
                    Commit::Save(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(docs.load().await.unwrap().len(), 16);
    }
}
