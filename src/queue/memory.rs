//! In-process queue with explicit redelivery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MessageQueue, Topic};

/// Error type for in-memory queue.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The queue no longer accepts messages.
    #[error("Queue closed, dropped message for topic {0}")]
    Closed(Topic),
}

/// One delivery attempt of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Message id, stable across redeliveries.
    pub id: u64,
    /// Topic the message was published on.
    pub topic: Topic,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// 1 for the first delivery, incremented on each redelivery.
    pub attempt: u32,
}

/// FIFO in-memory queue.
///
/// FIFO is an implementation detail; consumers must not rely on ordering.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<Delivery>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next pending delivery.
    pub fn pop(&self) -> Option<Delivery> {
        self.pending.lock().pop_front()
    }

    /// Put a delivery back for another attempt.
    pub fn requeue(&self, mut delivery: Delivery) {
        delivery.attempt += 1;
        self.pending.lock().push_back(delivery);
    }

    /// Enqueue a copy of every pending message, as an at-least-once
    /// transport is allowed to do.
    pub fn duplicate_all(&self) {
        let mut pending = self.pending.lock();
        let copies: Vec<Delivery> = pending.iter().cloned().collect();
        pending.extend(copies);
    }

    /// Reverse the pending order.
    pub fn reverse(&self) {
        let mut pending = self.pending.lock();
        let reversed: VecDeque<Delivery> = pending.drain(..).rev().collect();
        *pending = reversed;
    }

    /// Pending deliveries on a topic, without removing them.
    pub fn peek_topic(&self, topic: Topic) -> Vec<Delivery> {
        self.pending
            .lock()
            .iter()
            .filter(|d| d.topic == topic)
            .cloned()
            .collect()
    }

    /// Stop accepting messages.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Accept messages again.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Number of pending deliveries.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    type Error = QueueError;

    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<(), Self::Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(topic));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push_back(Delivery {
            id,
            topic,
            payload,
            attempt: 1,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_pop() {
        let queue = InMemoryQueue::new();
        queue.publish(Topic::Read, b"a".to_vec()).await.unwrap();
        queue.publish(Topic::Map, b"b".to_vec()).await.unwrap();

        assert_eq!(queue.len(), 2);
        let first = queue.pop().unwrap();
        assert_eq!(first.topic, Topic::Read);
        assert_eq!(first.attempt, 1);
        assert_eq!(queue.pop().unwrap().payload, b"b".to_vec());
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn test_requeue_increments_attempt_and_keeps_id() {
        let queue = InMemoryQueue::new();
        queue.publish(Topic::Reduce, b"x".to_vec()).await.unwrap();

        let delivery = queue.pop().unwrap();
        let id = delivery.id;
        queue.requeue(delivery);

        let again = queue.pop().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn test_duplicate_all() {
        let queue = InMemoryQueue::new();
        queue.publish(Topic::Clean, b"x".to_vec()).await.unwrap();
        queue.duplicate_all();

        assert_eq!(queue.peek_topic(Topic::Clean).len(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = InMemoryQueue::new();
        queue.close();
        assert!(queue.publish(Topic::Read, vec![]).await.is_err());
        queue.reopen();
        assert!(queue.publish(Topic::Read, vec![]).await.is_ok());
    }
}
