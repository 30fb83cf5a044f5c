//! Completion barrier for fan-out stages.
//!
//! A fan-out stage is complete when all of its expected outputs are listed
//! under a shared prefix. Each producer checks the barrier exactly once, after
//! its own output is durable:
//!
//! ```text
//! producer i:  put(output_i)  ->  list(prefix).len() == expected ?  ->  trigger next
//! ```
//!
//! Listing is eventually consistent, so:
//! - `false` means "not yet, or another producer will see it"; never a hard negative
//! - several producers may see `true`; the next stage must be idempotent
//!
//! The tracker neither retries nor elects a leader.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::store::BlobStore;

/// Snapshot of a barrier prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarrierObservation {
    /// Prefix that was listed.
    pub prefix: String,
    /// Objects seen under the prefix.
    pub observed: usize,
    /// Objects the stage produces when complete.
    pub expected: usize,
}

impl BarrierObservation {
    /// Whether the snapshot shows every expected output.
    pub fn is_complete(&self) -> bool {
        self.observed == self.expected
    }

    /// Whether more objects than expected were listed.
    pub fn is_overfull(&self) -> bool {
        self.observed > self.expected
    }
}

/// Decides whether a fan-out stage has finished.
pub struct BarrierTracker<S: BlobStore> {
    store: Arc<S>,
}

impl<S: BlobStore> BarrierTracker<S> {
    /// Create a tracker over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// List `prefix` and report what was seen.
    pub async fn observe(&self, prefix: &str, expected: usize) -> PipelineResult<BarrierObservation> {
        let observed = self
            .store
            .list(prefix)
            .await
            .map_err(PipelineError::from_store)?
            .len();

        let observation = BarrierObservation {
            prefix: prefix.to_string(),
            observed,
            expected,
        };

        if observation.is_overfull() {
            // Stray objects under a run prefix mean the barrier can never fire.
            warn!(
                prefix = %prefix,
                observed,
                expected,
                "Barrier prefix holds more objects than expected"
            );
        } else {
            debug!(prefix = %prefix, observed, expected, "Barrier observed");
        }

        Ok(observation)
    }

    /// True iff every expected output under `prefix` is listed.
    pub async fn check_and_arm(&self, prefix: &str, expected: usize) -> PipelineResult<bool> {
        Ok(self.observe(prefix, expected).await?.is_complete())
    }
}

impl<S: BlobStore> Clone for BarrierTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBlobStore;

    #[tokio::test]
    async fn test_incomplete_then_complete() {
        let store = Arc::new(InMemoryBlobStore::new());
        let barrier = BarrierTracker::new(Arc::clone(&store));

        store.insert("runs/r/result/00000", "[]");
        assert!(!barrier.check_and_arm("runs/r/result/", 2).await.unwrap());

        store.insert("runs/r/result/00001", "[]");
        assert!(barrier.check_and_arm("runs/r/result/", 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_lagging_listing_is_not_complete() {
        let store = Arc::new(InMemoryBlobStore::with_deferred_listing());
        let barrier = BarrierTracker::new(Arc::clone(&store));

        store.put("runs/r/result/00000", b"[]".to_vec()).await.unwrap();
        assert!(!barrier.check_and_arm("runs/r/result/", 1).await.unwrap());

        store.settle();
        assert!(barrier.check_and_arm("runs/r/result/", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_overfull_is_not_complete() {
        let store = Arc::new(InMemoryBlobStore::new());
        let barrier = BarrierTracker::new(Arc::clone(&store));
        for i in 0..3 {
            store.insert(format!("runs/r/result/{:05}", i), "[]");
        }

        let observation = barrier.observe("runs/r/result/", 2).await.unwrap();
        assert!(observation.is_overfull());
        assert!(!observation.is_complete());
    }

    #[tokio::test]
    async fn test_other_runs_do_not_count() {
        let store = Arc::new(InMemoryBlobStore::new());
        let barrier = BarrierTracker::new(Arc::clone(&store));
        store.insert("runs/r/result/00000", "[]");
        store.insert("runs/r2/result/00000", "[]");

        let observation = barrier.observe("runs/r/result/", 1).await.unwrap();
        assert_eq!(observation.observed, 1);
    }
}
