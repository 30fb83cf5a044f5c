//! Service state management.
//!
//! Holds the blob store and the local dispatcher that HTTP handlers and the
//! background worker share.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::controller::RunController;
use crate::dispatch::Dispatcher;
use crate::queue::InMemoryQueue;
use crate::store::BlobStore;

/// Shared service state.
pub struct ServiceState<S: BlobStore + 'static> {
    /// Blob store for every run's objects.
    pub store: Arc<S>,
    /// Local message pump.
    pub dispatcher: Arc<Dispatcher<S>>,
    /// Deployment configuration.
    pub config: Arc<PipelineConfig>,
    backend: &'static str,
}

impl<S: BlobStore + 'static> ServiceState<S> {
    /// Create service state over a store.
    ///
    /// `backend` names the store in health responses.
    pub fn new(store: S, config: PipelineConfig, backend: &'static str) -> Self {
        let store = Arc::new(store);
        let queue = Arc::new(InMemoryQueue::new());
        let dispatcher = Dispatcher::new(Arc::clone(&store), queue, config.clone());
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
            config: Arc::new(config),
            backend,
        }
    }

    /// Run controller.
    pub fn controller(&self) -> &RunController<S, InMemoryQueue> {
        self.dispatcher.controller()
    }

    /// Name of the store backend.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Messages waiting to be dispatched.
    pub fn queue_depth(&self) -> usize {
        self.dispatcher.queue().len()
    }
}

impl<S: BlobStore + 'static> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
            config: Arc::clone(&self.config),
            backend: self.backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBlobStore;

    #[tokio::test]
    async fn test_clone_shares_queue() {
        let state = ServiceState::new(InMemoryBlobStore::new(), PipelineConfig::default(), "memory");
        state.store.insert("config/StopWords", "the");
        state.store.insert("input/a.txt", "cat act");

        let cloned = state.clone();
        cloned
            .controller()
            .start("config/StopWords", "input/")
            .await
            .unwrap();

        assert_eq!(state.queue_depth(), 1);
        assert_eq!(state.backend(), "memory");
    }
}
