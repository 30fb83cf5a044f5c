//! In-memory blob store for tests and single-process deployments.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::BlobStore;

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Injected failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// In-memory blob store.
///
/// Uses a BTreeMap for sorted listings. Writes replace whole values under a
/// lock, so readers never observe partial objects.
///
/// Two test hooks model a real object store's weaker guarantees:
/// - deferred listing: new writes stay out of `list` until [`settle`](Self::settle)
/// - injected failures: the next N `put`s fail
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    /// Objects by path.
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Paths written but not yet visible to `list`.
    unlisted: Mutex<BTreeSet<String>>,
    /// Whether new writes are hidden from `list`.
    defer_listing: AtomicBool,
    /// Remaining `put` calls that will fail.
    put_failures: AtomicUsize,
}

impl InMemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose listings lag behind writes until settled.
    pub fn with_deferred_listing() -> Self {
        let store = Self::default();
        store.defer_listing.store(true, Ordering::SeqCst);
        store
    }

    /// Insert an object directly (seeding inputs).
    pub fn insert(&self, path: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.objects.write().insert(path.into(), body.into());
    }

    /// Make every write so far visible to `list`.
    pub fn settle(&self) {
        self.unlisted.lock().clear();
    }

    /// Stop hiding new writes from `list` and settle pending ones.
    pub fn disable_deferred_listing(&self) {
        self.defer_listing.store(false, Ordering::SeqCst);
        self.settle();
    }

    /// Make the next `count` calls to `put` fail.
    pub fn fail_next_puts(&self, count: usize) {
        self.put_failures.store(count, Ordering::SeqCst);
    }

    /// Read an object synchronously.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().get(path).cloned()
    }

    /// All object paths, ignoring listing lag.
    pub fn paths(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn take_put_failure(&self) -> bool {
        self.put_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    type Error = InMemoryError;

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.objects.read().get(path).cloned())
    }

    async fn put(&self, path: &str, body: Vec<u8>) -> Result<(), Self::Error> {
        if self.take_put_failure() {
            return Err(InMemoryError::Unavailable(format!("injected failure writing {}", path)));
        }
        self.objects.write().insert(path.to_string(), body);
        if self.defer_listing.load(Ordering::SeqCst) {
            self.unlisted.lock().insert(path.to_string());
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Self::Error> {
        let objects = self.objects.read();
        let unlisted = self.unlisted.lock();
        Ok(objects
            .range(prefix.to_string()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(prefix))
            .filter(|path| !unlisted.contains(*path))
            .cloned()
            .collect())
    }

    async fn delete_all(&self, prefix: &str) -> Result<usize, Self::Error> {
        let mut objects = self.objects.write();
        let doomed: Vec<String> = objects
            .range(prefix.to_string()..)
            .map(|(path, _)| path.clone())
            .take_while(|path| path.starts_with(prefix))
            .collect();
        for path in &doomed {
            objects.remove(path);
        }
        let mut unlisted = self.unlisted.lock();
        unlisted.retain(|path| !path.starts_with(prefix));
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryBlobStore::new();
        store.put("a/b", b"hello".to_vec()).await.unwrap();

        assert_eq!(store.get("a/b").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.get("a/c").await.unwrap(), None);
        assert!(store.exists("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = InMemoryBlobStore::new();
        store.put("k", b"one".to_vec()).await.unwrap();
        store.put("k", b"two".to_vec()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_sorted() {
        let store = InMemoryBlobStore::new();
        store.insert("runs/a/shuf/00001/00000", "x");
        store.insert("runs/a/shuf/00000/00000", "x");
        store.insert("runs/a/result/00000", "x");
        store.insert("runs/ab/shuf/00000/00000", "x");

        let listed = store.list("runs/a/shuf/").await.unwrap();
        assert_eq!(listed, vec!["runs/a/shuf/00000/00000", "runs/a/shuf/00001/00000"]);
    }

    #[tokio::test]
    async fn test_deferred_listing() {
        let store = InMemoryBlobStore::with_deferred_listing();
        store.put("p/1", b"x".to_vec()).await.unwrap();

        // Visible to get immediately, not yet to list
        assert!(store.get("p/1").await.unwrap().is_some());
        assert!(store.list("p/").await.unwrap().is_empty());

        store.settle();
        assert_eq!(store.list("p/").await.unwrap(), vec!["p/1"]);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let store = InMemoryBlobStore::new();
        store.insert("runs/a/read/00000", "x");
        store.insert("runs/a/map/00000", "x");
        store.insert("runs/b/read/00000", "x");

        let removed = store.delete_all("runs/a/").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.paths(), vec!["runs/b/read/00000"]);
    }

    #[tokio::test]
    async fn test_injected_put_failures() {
        let store = InMemoryBlobStore::new();
        store.fail_next_puts(1);

        assert!(store.put("k", b"v".to_vec()).await.is_err());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.put("k", b"v".to_vec()).await.is_ok());
    }
}
