//! Durable and in-process storage backends for memory documents.
//!
//! A backend stores opaque byte documents addressed by key space and hands
//! out the mutex guarding each document. Typed access and failure policies
//! live one level up in [`Collection`](crate::persistence::Collection).

use std::collections::HashMap;
use std::hash::Hash;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, PoisonError};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{MemoryError, MemoryResult};

/// Trait implemented by document storage backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the document stored under `key_space`, or `None` when it does
    /// not exist yet.
    async fn read(&self, key_space: &str) -> MemoryResult<Option<Vec<u8>>>;

    /// Replaces the document stored under `key_space`.
    async fn write(&self, key_space: &str, contents: &[u8]) -> MemoryResult<()>;

    /// Returns the mutex that serialises load/mutate/save cycles on
    /// `key_space`. Handles resolving to the same document must receive the
    /// same mutex. The default hands out a fresh one per call.
    fn key_space_lock(&self, _key_space: &str) -> Arc<Mutex<()>> {
        Arc::new(Mutex::new(()))
    }
}

/// Lazily populated map from document identity to its mutex.
#[derive(Debug)]
struct LockTable<K> {
    locks: std::sync::Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self {
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash> LockTable<K> {
    fn get(&self, key: K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }
}

/// Locks for file documents, keyed by canonical path and shared by every
/// [`FileBackend`] in the process.
static FILE_LOCKS: LazyLock<LockTable<PathBuf>> = LazyLock::new(LockTable::default);

impl std::fmt::Debug for dyn StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackend").finish_non_exhaustive()
    }
}

/// Backend storing one JSON file per key space beneath a root directory.
///
/// Writes are staged to a temporary sibling and renamed over the target, so a
/// reader observes either the previous or the new document, never a partial
/// one. Backends opened on the same directory within one process share their
/// per-document locks; separate processes writing the same directory are not
/// coordinated.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Opens (or creates) the root directory.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while creating or resolving the
    /// directory.
    pub async fn open(root: impl Into<PathBuf>) -> MemoryResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    /// Returns the canonical root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file backing `key_space`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the key space is empty or
    /// would escape the root directory.
    pub fn path_for(&self, key_space: &str) -> MemoryResult<PathBuf> {
        if key_space.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("key space must not be empty"));
        }
        if key_space.contains(['/', '\\']) || key_space.starts_with('.') {
            return Err(MemoryError::InvalidRecord(
                "key space must be a plain file name",
            ));
        }
        Ok(self.root.join(format!("{key_space}.json")))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn read(&self, key_space: &str) -> MemoryResult<Option<Vec<u8>>> {
        let path = self.path_for(key_space)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, key_space: &str, contents: &[u8]) -> MemoryResult<()> {
        let path = self.path_for(key_space)?;
        let staging = self
            .root
            .join(format!(".{key_space}.{}.tmp", Uuid::new_v4().simple()));

        let staged = async {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&staging)
                .await?;
            file.write_all(contents).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&staging, &path).await
        }
        .await;

        if let Err(err) = staged {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }

    fn key_space_lock(&self, key_space: &str) -> Arc<Mutex<()>> {
        match self.path_for(key_space) {
            Ok(path) => FILE_LOCKS.get(path),
            // Invalid key spaces fail on read and write anyway.
            Err(_) => Arc::new(Mutex::new(())),
        }
    }
}

/// Process-local backend keeping documents in a map.
///
/// Each instance is isolated, which makes it suitable for tests and for
/// tiers that do not need to survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    documents: RwLock<HashMap<String, Vec<u8>>>,
    locks: LockTable<String>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of key spaces holding a document.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Returns whether no document has been written yet.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn read(&self, key_space: &str) -> MemoryResult<Option<Vec<u8>>> {
        let guard = self.documents.read().await;
        Ok(guard.get(key_space).cloned())
    }

    async fn write(&self, key_space: &str, contents: &[u8]) -> MemoryResult<()> {
        let mut guard = self.documents.write().await;
        guard.insert(key_space.to_owned(), contents.to_vec());
        Ok(())
    }

    fn key_space_lock(&self, key_space: &str) -> Arc<Mutex<()>> {
        self.locks.get(key_space.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("memory-backend-{}", Uuid::new_v4()));
        path
    }

    #[tokio::test]
    async fn file_backend_roundtrip() {
        let root = temp_root();
        let backend = FileBackend::open(&root).await.unwrap();

        assert!(backend.read("stm_cache").await.unwrap().is_none());

        backend.write("stm_cache", b"{\"a\":1}").await.unwrap();
        backend.write("stm_cache", b"{\"b\":2}").await.unwrap();
        let data = backend.read("stm_cache").await.unwrap().unwrap();
        assert_eq!(data, b"{\"b\":2}");

        assert!(root.join("stm_cache.json").exists());
        let leftovers = std::fs::read_dir(&root)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn file_backend_rejects_path_like_key_spaces() {
        let root = temp_root();
        let backend = FileBackend::open(&root).await.unwrap();

        for key_space in ["", "../escape", "nested/doc", ".hidden"] {
            let err = backend
                .write(key_space, b"[]")
                .await
                .expect_err("key space should be rejected");
            assert!(matches!(err, MemoryError::InvalidRecord(_)));
        }

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn file_backends_on_one_directory_share_locks() {
        let root = temp_root();
        let first = FileBackend::open(&root).await.unwrap();
        let second = FileBackend::open(root.join(".")).await.unwrap();
        assert_eq!(first.root(), second.root());

        assert!(Arc::ptr_eq(
            &first.key_space_lock("sm_knowledge_graph"),
            &second.key_space_lock("sm_knowledge_graph"),
        ));
        assert!(!Arc::ptr_eq(
            &first.key_space_lock("sm_knowledge_graph"),
            &first.key_space_lock("sm_entity_index"),
        ));

        let other = FileBackend::open(temp_root()).await.unwrap();
        assert!(!Arc::ptr_eq(
            &first.key_space_lock("sm_knowledge_graph"),
            &other.key_space_lock("sm_knowledge_graph"),
        ));

        let _ = std::fs::remove_dir_all(root);
        let _ = std::fs::remove_dir_all(other.root());
    }

    #[tokio::test]
    async fn in_memory_backend_isolates_instances() {
        let first = InMemoryBackend::new();
        let second = InMemoryBackend::new();

        first.write("wm_scratchpad", b"{}").await.unwrap();

        assert_eq!(first.len().await, 1);
        assert!(second.is_empty().await);
        assert!(second.read("wm_scratchpad").await.unwrap().is_none());

        assert!(Arc::ptr_eq(
            &first.key_space_lock("wm_scratchpad"),
            &first.key_space_lock("wm_scratchpad"),
        ));
        assert!(!Arc::ptr_eq(
            &first.key_space_lock("wm_scratchpad"),
            &second.key_space_lock("wm_scratchpad"),
        ));
    }
}
