//! # anagram-pipeline
//!
//! Message-driven MapReduce that groups the words of a corpus into anagram
//! classes.
//!
//! Every stage invocation is a stateless handler triggered by one message.
//! All state lives in a blob store; fan-in is detected by listing a prefix.
//!
//! ## Architecture
//!
//! ```text
//! start ──► Read(i) ──► Map(i) ──► Shuffle(i) ══barrier══► Reduce(b) ══barrier══► Clean
//!            N            N            N x B                   B                    1
//!                                                                                   │
//!                                                                        output/{run}.txt
//! ```
//!
//! ## Guarantees
//!
//! - Every stage is idempotent: re-running a unit writes identical bytes
//! - Duplicate and reordered deliveries never change the final result
//! - A barrier fires at least once after its last input is listed
//! - The final object is the only artifact that survives a run

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod layout;
pub mod partition;
pub mod queue;
pub mod store;
pub mod transform;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use barrier::{BarrierObservation, BarrierTracker};
pub use config::PipelineConfig;
pub use controller::{RunController, StartOptions};
pub use coordinator::{StageContext, StageCoordinator, StageReport};
pub use dispatch::{DeadLetter, DispatchOutcome, Dispatcher, DrainSummary};
pub use error::{PipelineError, PipelineResult};
pub use partition::{PartitionHash, PartitionHasher};
pub use queue::{Delivery, InMemoryQueue, MessageQueue, QueueError};
pub use store::{BlobStore, InMemoryBlobStore};
#[cfg(feature = "postgres")]
pub use store::PostgresBlobStore;
pub use transform::{map_to_pairs, normalize, parse_stopwords, reduce_groups, render_groups};
pub use types::{
    anagram_key, AnagramGroup, AnagramPair, CleanRequest, CompletionEvent, MapRequest,
    ReadRequest, ReduceRequest, RunHandle, RunId, RunManifest, RunParams, RunStatus,
    ShuffleRequest, Stage, Topic,
};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Schema version of stage objects and message payloads.
/// Increment on breaking changes to any of them.
pub const PIPELINE_SCHEMA_VERSION: &str = "1.0.0";
