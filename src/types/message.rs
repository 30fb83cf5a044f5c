//! Typed message payloads exchanged between stages.
//!
//! Payloads are JSON with camelCase fields. Each request type is bound to the
//! topic it is published on through [`TopicMessage`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::run::{RunId, RunParams};
use crate::error::{PipelineError, PipelineResult};

/// Queue topics, one per stage trigger plus the completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Start -> Read.
    Read,
    /// Read -> Map.
    Map,
    /// Map -> Shuffle.
    Shuffle,
    /// Shuffle -> Reduce.
    Reduce,
    /// Reduce -> Clean.
    Clean,
    /// Clean -> outside world.
    Finished,
}

impl Topic {
    /// Stable topic name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "reader-input",
            Self::Map => "mapper-input",
            Self::Shuffle => "shuffler-input",
            Self::Reduce => "reducer-input",
            Self::Clean => "cleaner-input",
            Self::Finished => "finished",
        }
    }

    /// All topics.
    pub fn all() -> [Topic; 6] {
        [
            Self::Read,
            Self::Map,
            Self::Shuffle,
            Self::Reduce,
            Self::Clean,
            Self::Finished,
        ]
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload that travels on a fixed topic.
pub trait TopicMessage: Serialize + DeserializeOwned {
    /// Topic the payload is published on.
    const TOPIC: Topic;

    /// Run the payload belongs to.
    fn run_id(&self) -> &RunId;

    /// Schema checks beyond what decoding enforces.
    fn validate(&self) -> PipelineResult<()>;
}

/// Decode and validate a payload.
pub fn decode<M: TopicMessage>(payload: &[u8]) -> PipelineResult<M> {
    let message: M = serde_json::from_slice(payload).map_err(|e| {
        PipelineError::MalformedPayload(format!("{} payload: {}", M::TOPIC, e))
    })?;
    message.validate()?;
    Ok(message)
}

/// Encode a payload.
pub fn encode<M: TopicMessage>(message: &M) -> PipelineResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| {
        PipelineError::MalformedPayload(format!("{} payload: {}", M::TOPIC, e))
    })
}

/// Trigger for one Read invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    /// Run identifier.
    pub run_id: RunId,
    /// Raw document to normalize.
    pub target_document: String,
    /// Position of the document in the run's input listing.
    pub source_index: usize,
    /// Stopword object to filter with.
    pub stopwords_path: String,
    /// Fixed run parameters.
    #[serde(flatten)]
    pub params: RunParams,
}

/// Trigger for one Map invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRequest {
    /// Run identifier.
    pub run_id: RunId,
    /// Word-list object written by Read.
    pub target_object: String,
    /// Source index the word list came from.
    pub source_index: usize,
    /// Fixed run parameters.
    #[serde(flatten)]
    pub params: RunParams,
}

/// Trigger for one Shuffle invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleRequest {
    /// Run identifier.
    pub run_id: RunId,
    /// Pair-list object written by Map.
    pub target_object: String,
    /// Source index the pairs came from.
    pub source_index: usize,
    /// Fixed run parameters.
    #[serde(flatten)]
    pub params: RunParams,
}

/// Trigger for one Reduce invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceRequest {
    /// Run identifier.
    pub run_id: RunId,
    /// Bucket to reduce.
    pub bucket_index: usize,
    /// Fixed run parameters.
    #[serde(flatten)]
    pub params: RunParams,
}

/// Trigger for the Clean invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanRequest {
    /// Run identifier.
    pub run_id: RunId,
    /// Fixed run parameters.
    #[serde(flatten)]
    pub params: RunParams,
}

/// Completion signal published once the final object exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    /// Run identifier.
    pub run_id: RunId,
    /// Location of the joined result.
    pub final_object_path: String,
    /// Number of anagram groups in the result.
    pub group_count: usize,
    /// When the result was published.
    pub finished_at: DateTime<Utc>,
}

fn check_source_index(source_index: usize, params: &RunParams) -> PipelineResult<()> {
    if source_index >= params.input_count {
        return Err(PipelineError::MalformedPayload(format!(
            "sourceIndex {} out of range for inputCount {}",
            source_index, params.input_count
        )));
    }
    Ok(())
}

fn check_non_empty(field: &str, value: &str) -> PipelineResult<()> {
    if value.trim().is_empty() {
        return Err(PipelineError::MalformedPayload(format!("{} must not be empty", field)));
    }
    Ok(())
}

impl TopicMessage for ReadRequest {
    const TOPIC: Topic = Topic::Read;

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn validate(&self) -> PipelineResult<()> {
        self.params.validate()?;
        check_source_index(self.source_index, &self.params)?;
        check_non_empty("targetDocument", &self.target_document)?;
        check_non_empty("stopwordsPath", &self.stopwords_path)
    }
}

impl TopicMessage for MapRequest {
    const TOPIC: Topic = Topic::Map;

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn validate(&self) -> PipelineResult<()> {
        self.params.validate()?;
        check_source_index(self.source_index, &self.params)?;
        check_non_empty("targetObject", &self.target_object)
    }
}

impl TopicMessage for ShuffleRequest {
    const TOPIC: Topic = Topic::Shuffle;

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn validate(&self) -> PipelineResult<()> {
        self.params.validate()?;
        check_source_index(self.source_index, &self.params)?;
        check_non_empty("targetObject", &self.target_object)
    }
}

impl TopicMessage for ReduceRequest {
    const TOPIC: Topic = Topic::Reduce;

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn validate(&self) -> PipelineResult<()> {
        self.params.validate()?;
        if self.bucket_index >= self.params.bucket_count {
            return Err(PipelineError::MalformedPayload(format!(
                "bucketIndex {} out of range for bucketCount {}",
                self.bucket_index, self.params.bucket_count
            )));
        }
        Ok(())
    }
}

impl TopicMessage for CleanRequest {
    const TOPIC: Topic = Topic::Clean;

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn validate(&self) -> PipelineResult<()> {
        self.params.validate()
    }
}

impl TopicMessage for CompletionEvent {
    const TOPIC: Topic = Topic::Finished;

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn validate(&self) -> PipelineResult<()> {
        check_non_empty("finalObjectPath", &self.final_object_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionHash;

    fn params() -> RunParams {
        RunParams::new(2, 3, PartitionHash::Xxh64)
    }

    #[test]
    fn test_read_request_wire_format() {
        let request = ReadRequest {
            run_id: RunId::parse("abc").unwrap(),
            target_document: "input/a.txt".to_string(),
            source_index: 1,
            stopwords_path: "runs/abc/stopwords".to_string(),
            params: params(),
        };
        let value: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["runId"], "abc");
        assert_eq!(value["targetDocument"], "input/a.txt");
        assert_eq!(value["inputCount"], 2);
        assert_eq!(value["bucketCount"], 3);
        assert_eq!(value["stopwordsPath"], "runs/abc/stopwords");
        assert_eq!(value["partitionHash"], "xxh64");
    }

    #[test]
    fn test_decode_rejects_zero_buckets() {
        let payload = br#"{"runId":"abc","bucketIndex":0,"inputCount":2,"bucketCount":0}"#;
        let err = decode::<ReduceRequest>(payload).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPayload(_)));
    }

    #[test]
    fn test_decode_rejects_bucket_out_of_range() {
        let payload = br#"{"runId":"abc","bucketIndex":3,"inputCount":2,"bucketCount":3}"#;
        assert!(decode::<ReduceRequest>(payload).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode::<CleanRequest>(b"not json").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPayload(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_decode_rejects_escaping_run_id() {
        let payload = br#"{"runId":"../x","inputCount":2,"bucketCount":3}"#;
        assert!(decode::<CleanRequest>(payload).is_err());
    }

    #[test]
    fn test_encode_decode_reduce_request() {
        let request = ReduceRequest {
            run_id: RunId::parse("abc").unwrap(),
            bucket_index: 2,
            params: params(),
        };
        let bytes = encode(&request).unwrap();
        let decoded: ReduceRequest = decode(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_topic_names_unique() {
        let names: std::collections::BTreeSet<_> = Topic::all().iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), Topic::all().len());
    }
}
