//! Message queue backends.
//!
//! Delivery is at-least-once and unordered. Consumers must treat every
//! message as possibly duplicated or reordered.

pub mod memory;

use async_trait::async_trait;

pub use crate::types::Topic;

/// Trait for message queue backends.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Error type for queue operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish an opaque payload on a topic.
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<(), Self::Error>;
}

pub use memory::{Delivery, InMemoryQueue, QueueError};
