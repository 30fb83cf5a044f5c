//! Run identity, parameters and lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::partition::PartitionHash;

/// Maximum accepted length of a run identifier.
const MAX_RUN_ID_LEN: usize = 64;

/// Opaque identifier of one pipeline execution.
///
/// A run id is embedded in every object path of the run, so it is restricted
/// to ASCII alphanumerics, `-` and `_`. Decoding a message with any other run
/// id fails, which keeps a payload from addressing objects outside its run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh run id (16 lowercase hex characters).
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4();
        Self(hex::encode(&uuid.as_bytes()[..8]))
    }

    /// Parse and validate a run id.
    pub fn parse(s: &str) -> PipelineResult<Self> {
        if s.is_empty() || s.len() > MAX_RUN_ID_LEN {
            return Err(PipelineError::MalformedPayload(format!(
                "run id must be 1..={} characters, got {}",
                MAX_RUN_ID_LEN,
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(PipelineError::MalformedPayload(format!(
                "run id contains forbidden characters: {:?}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Normalize one document into a word list.
    Read,
    /// Turn one word list into anagram pairs.
    Map,
    /// Partition one pair list into buckets.
    Shuffle,
    /// Group one bucket into anagram classes.
    Reduce,
    /// Join results and purge the run namespace.
    Clean,
    /// Terminal state.
    Done,
}

impl Stage {
    /// Directory name of the objects this stage writes, if any.
    pub fn object_dir(&self) -> Option<&'static str> {
        match self {
            Self::Read => Some("read"),
            Self::Map => Some("map"),
            Self::Shuffle => Some("shuf"),
            Self::Reduce => Some("result"),
            Self::Clean | Self::Done => None,
        }
    }

    /// The stage that follows this one.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Read => Some(Self::Map),
            Self::Map => Some(Self::Shuffle),
            Self::Shuffle => Some(Self::Reduce),
            Self::Reduce => Some(Self::Clean),
            Self::Clean => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Map => write!(f, "map"),
            Self::Shuffle => write!(f, "shuffle"),
            Self::Reduce => write!(f, "reduce"),
            Self::Clean => write!(f, "clean"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Parameters fixed for the lifetime of a run.
///
/// Carried in every stage message so that each invocation can derive paths and
/// barrier expectations without consulting deployment configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    /// Number of source documents.
    pub input_count: usize,
    /// Shuffle fan-out.
    pub bucket_count: usize,
    /// Digest used to assign keys to buckets.
    #[serde(default)]
    pub partition_hash: PartitionHash,
}

impl RunParams {
    /// Create run parameters.
    pub fn new(input_count: usize, bucket_count: usize, partition_hash: PartitionHash) -> Self {
        Self {
            input_count,
            bucket_count,
            partition_hash,
        }
    }

    /// Reject parameters no stage can work with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.input_count == 0 {
            return Err(PipelineError::MalformedPayload(
                "inputCount must be at least 1".to_string(),
            ));
        }
        if self.bucket_count == 0 {
            return Err(PipelineError::MalformedPayload(
                "bucketCount must be at least 1".to_string(),
            ));
        }
        self.expected_partitions().map(|_| ())
    }

    /// Number of shuffle partition objects the run produces.
    pub fn expected_partitions(&self) -> PipelineResult<usize> {
        self.input_count
            .checked_mul(self.bucket_count)
            .ok_or_else(|| {
                PipelineError::MalformedPayload(format!(
                    "inputCount {} x bucketCount {} overflows",
                    self.input_count, self.bucket_count
                ))
            })
    }
}

/// Durable description of a run, written once by `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    /// Run identifier.
    pub run_id: RunId,
    /// Fixed run parameters.
    #[serde(flatten)]
    pub params: RunParams,
    /// Input documents in source-index order.
    pub documents: Vec<String>,
    /// Snapshot of the stopword object taken at start.
    pub stopwords_path: String,
    /// Where the final result will be written.
    pub output_path: String,
    /// When the run was started.
    pub created_at: DateTime<Utc>,
}

/// Handle returned to whoever started a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHandle {
    /// Run identifier.
    pub run_id: RunId,
    /// Number of documents fanned out.
    pub input_count: usize,
    /// Shuffle fan-out of the run.
    pub bucket_count: usize,
    /// Digest used by the run's shuffle.
    pub partition_hash: PartitionHash,
    /// Expected location of the final result.
    pub output_path: String,
}

impl From<&RunManifest> for RunHandle {
    fn from(manifest: &RunManifest) -> Self {
        Self {
            run_id: manifest.run_id.clone(),
            input_count: manifest.params.input_count,
            bucket_count: manifest.params.bucket_count,
            partition_hash: manifest.params.partition_hash,
            output_path: manifest.output_path.clone(),
        }
    }
}

/// Position of a run, derived from the objects that exist for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Neither a manifest nor a final result exists.
    Unknown {
        /// Run identifier.
        run_id: RunId,
    },
    /// The run is waiting on `stage`, which has `observed` of `expected` outputs.
    InProgress {
        /// Run identifier.
        run_id: RunId,
        /// Earliest incomplete stage.
        stage: Stage,
        /// Outputs of `stage` currently listed.
        observed: usize,
        /// Outputs `stage` must produce.
        expected: usize,
    },
    /// The final object exists.
    Done {
        /// Run identifier.
        run_id: RunId,
        /// Location of the joined result.
        final_object_path: String,
    },
}
