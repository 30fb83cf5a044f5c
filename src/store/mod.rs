//! Blob storage backends.
//!
//! The pipeline persists every intermediate result as a named blob. Backends
//! must provide:
//!
//! - atomic, overwrite-safe `put` (readers never see a partial object)
//! - read-after-write `get` for the same path
//! - prefix `list`, which may lag behind recent writes
//! - prefix `delete_all`

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

/// Trait for blob storage backends.
///
/// Listing results are sorted by path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch an object; `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Write an object, replacing any previous content atomically.
    async fn put(&self, path: &str, body: Vec<u8>) -> Result<(), Self::Error>;

    /// List object paths under a prefix (eventually consistent).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, Self::Error>;

    /// Delete every object under a prefix, returning how many were removed.
    async fn delete_all(&self, prefix: &str) -> Result<usize, Self::Error>;

    /// Check whether an object exists.
    async fn exists(&self, path: &str) -> Result<bool, Self::Error> {
        Ok(self.get(path).await?.is_some())
    }

    /// Check if the backend is reachable.
    async fn is_healthy(&self) -> bool {
        true
    }
}

pub use memory::InMemoryBlobStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBlobStore;
