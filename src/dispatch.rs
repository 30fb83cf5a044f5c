//! Local message pump over [`InMemoryQueue`].
//!
//! Stands in for a managed queue service: pops deliveries, routes them to the
//! [`StageCoordinator`], redelivers retryable failures and dead-letters the
//! rest. Completion events are collected instead of routed.
//!
//! ## Redelivery
//!
//! | Outcome | Action |
//! |---------|--------|
//! | `Ok` | acknowledged |
//! | retryable error, attempt < max | requeued with attempt + 1 |
//! | retryable error, attempt == max | dead-lettered |
//! | non-retryable error | dead-lettered |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::PipelineConfig;
use crate::controller::RunController;
use crate::coordinator::{StageCoordinator, StageReport};
use crate::error::PipelineError;
use crate::queue::{Delivery, InMemoryQueue};
use crate::store::BlobStore;
use crate::types::{CompletionEvent, Topic};

/// A delivery that will not be attempted again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Message id.
    pub id: u64,
    /// Topic the message was published on.
    pub topic: Topic,
    /// Payload, lossily decoded for inspection.
    pub payload: String,
    /// Attempts made.
    pub attempts: u32,
    /// Error code of the last failure.
    pub error_code: &'static str,
    /// Error message of the last failure.
    pub error_message: String,
    /// When the message was given up on.
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    fn new(delivery: &Delivery, err: &PipelineError) -> Self {
        Self {
            id: delivery.id,
            topic: delivery.topic,
            payload: String::from_utf8_lossy(&delivery.payload).into_owned(),
            attempts: delivery.attempt,
            error_code: err.code(),
            error_message: err.to_string(),
            dead_lettered_at: Utc::now(),
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A stage handled the message.
    Handled(StageReport),
    /// The message was put back for another attempt.
    Retried {
        /// Attempt that failed.
        attempt: u32,
    },
    /// The message was dead-lettered.
    DeadLettered(DeadLetter),
    /// A completion event was collected.
    Completed(CompletionEvent),
}

/// Counts from one [`Dispatcher::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    /// Deliveries handled by a stage.
    pub handled: usize,
    /// Of those, duplicates that were ignored.
    pub skipped: usize,
    /// Deliveries requeued.
    pub retried: usize,
    /// Deliveries dead-lettered.
    pub dead_lettered: usize,
    /// Completion events collected.
    pub completed: usize,
}

impl DrainSummary {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled(report) => {
                self.handled += 1;
                if report.skipped {
                    self.skipped += 1;
                }
            }
            DispatchOutcome::Retried { .. } => self.retried += 1,
            DispatchOutcome::DeadLettered(_) => self.dead_lettered += 1,
            DispatchOutcome::Completed(_) => self.completed += 1,
        }
    }

    /// Total deliveries processed.
    pub fn total(&self) -> usize {
        self.handled + self.retried + self.dead_lettered + self.completed
    }
}

/// Routes queued deliveries to stage handlers.
pub struct Dispatcher<S: BlobStore> {
    coordinator: StageCoordinator<S, InMemoryQueue>,
    queue: Arc<InMemoryQueue>,
    max_attempts: u32,
    dead_letters: Mutex<Vec<DeadLetter>>,
    completions: Mutex<Vec<CompletionEvent>>,
}

impl<S: BlobStore + 'static> Dispatcher<S> {
    /// Create a dispatcher; redelivery is bounded by
    /// `config.max_delivery_attempts`.
    pub fn new(store: Arc<S>, queue: Arc<InMemoryQueue>, config: PipelineConfig) -> Self {
        let max_attempts = config.max_delivery_attempts.max(1);
        Self {
            coordinator: StageCoordinator::new(store, Arc::clone(&queue), config),
            queue,
            max_attempts,
            dead_letters: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
        }
    }

    /// Stage coordinator.
    pub fn coordinator(&self) -> &StageCoordinator<S, InMemoryQueue> {
        &self.coordinator
    }

    /// Run controller.
    pub fn controller(&self) -> &RunController<S, InMemoryQueue> {
        self.coordinator.controller()
    }

    /// Underlying queue.
    pub fn queue(&self) -> &Arc<InMemoryQueue> {
        &self.queue
    }

    /// Process the next delivery, if any.
    pub async fn dispatch_one(&self) -> Option<DispatchOutcome> {
        let delivery = self.queue.pop()?;

        if delivery.topic == Topic::Finished {
            return Some(self.collect_completion(delivery));
        }

        let outcome = match self.coordinator.handle(delivery.topic, &delivery.payload).await {
            Ok(report) => DispatchOutcome::Handled(report),
            Err(e) if e.is_retryable() && delivery.attempt < self.max_attempts => {
                let attempt = delivery.attempt;
                warn!(
                    id = delivery.id,
                    topic = %delivery.topic,
                    attempt,
                    max_attempts = self.max_attempts,
                    error = %e,
                    "Redelivering message"
                );
                self.queue.requeue(delivery);
                DispatchOutcome::Retried { attempt }
            }
            Err(e) => self.dead_letter(&delivery, &e),
        };
        Some(outcome)
    }

    /// Process deliveries until the queue is empty.
    pub async fn drain(&self) -> DrainSummary {
        let mut summary = DrainSummary::default();
        while let Some(outcome) = self.dispatch_one().await {
            summary.record(&outcome);
        }
        debug!(
            handled = summary.handled,
            retried = summary.retried,
            dead_lettered = summary.dead_lettered,
            "Queue drained"
        );
        summary
    }

    fn collect_completion(&self, delivery: Delivery) -> DispatchOutcome {
        match serde_json::from_slice::<CompletionEvent>(&delivery.payload) {
            Ok(event) => {
                self.completions.lock().push(event.clone());
                DispatchOutcome::Completed(event)
            }
            Err(e) => self.dead_letter(
                &delivery,
                &PipelineError::MalformedPayload(format!("{} payload: {}", Topic::Finished, e)),
            ),
        }
    }

    fn dead_letter(&self, delivery: &Delivery, err: &PipelineError) -> DispatchOutcome {
        let letter = DeadLetter::new(delivery, err);
        error!(
            id = letter.id,
            topic = %letter.topic,
            attempts = letter.attempts,
            code = letter.error_code,
            error = %letter.error_message,
            "Message dead-lettered"
        );
        self.dead_letters.lock().push(letter.clone());
        DispatchOutcome::DeadLettered(letter)
    }

    /// Dead letters collected so far.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    /// Completion events collected so far.
    pub fn completions(&self) -> Vec<CompletionEvent> {
        self.completions.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MessageQueue;
    use crate::store::InMemoryBlobStore;

    fn dispatcher(max_attempts: u32) -> (Arc<InMemoryBlobStore>, Arc<InMemoryQueue>, Dispatcher<InMemoryBlobStore>) {
        let store = Arc::new(InMemoryBlobStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let config = PipelineConfig {
            max_delivery_attempts: max_attempts,
            ..PipelineConfig::default()
        };
        let dispatcher = Dispatcher::new(Arc::clone(&store), Arc::clone(&queue), config);
        (store, queue, dispatcher)
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let (_store, _queue, dispatcher) = dispatcher(3);
        assert!(dispatcher.dispatch_one().await.is_none());
        assert_eq!(dispatcher.drain().await.total(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dead_lettered_immediately() {
        let (_store, queue, dispatcher) = dispatcher(3);
        queue.publish(Topic::Map, b"not json".to_vec()).await.unwrap();

        let summary = dispatcher.drain().await;
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(summary.retried, 0);

        let letters = dispatcher.dead_letters();
        assert_eq!(letters[0].error_code, "MALFORMED_PAYLOAD");
        assert_eq!(letters[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_exhausts_attempts() {
        let (_store, queue, dispatcher) = dispatcher(3);
        let payload = br#"{"runId":"r1","bucketIndex":0,"inputCount":1,"bucketCount":1}"#;
        queue.publish(Topic::Reduce, payload.to_vec()).await.unwrap();

        let summary = dispatcher.drain().await;
        assert_eq!(summary.retried, 2);
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(dispatcher.dead_letters()[0].attempts, 3);
        assert_eq!(dispatcher.dead_letters()[0].error_code, "TRANSIENT_IO");
    }

    #[tokio::test]
    async fn test_completion_events_are_collected() {
        let (_store, queue, dispatcher) = dispatcher(3);
        let event = CompletionEvent {
            run_id: crate::types::RunId::parse("r1").unwrap(),
            final_object_path: "output/r1.txt".to_string(),
            group_count: 0,
            finished_at: Utc::now(),
        };
        queue
            .publish(Topic::Finished, serde_json::to_vec(&event).unwrap())
            .await
            .unwrap();

        let summary = dispatcher.drain().await;
        assert_eq!(summary.completed, 1);
        assert_eq!(dispatcher.completions(), vec![event]);
    }
}
