//! Deployment configuration.
//!
//! ## Environment
//!
//! - `INPUT_PATH`: prefix listed for input documents (default: `input/`)
//! - `STOP_WORDS_PATH`: stopword object (default: `config/StopWords`)
//! - `OUTPUT_PATH`: prefix for final results (default: `output/`)
//! - `SHUFFLER_HASH_MODULO`: default bucket count for new runs (default: 5)
//! - `PARTITION_HASH`: `xxh64` or `sha256` (default: `xxh64`)
//! - `INPUT_SUFFIX`: only documents ending with this are inputs (default: `.txt`)
//! - `MAX_DELIVERY_ATTEMPTS`: redelivery bound of the local dispatcher (default: 5)
//!
//! Bucket count and hash only seed new runs. A running pipeline reads both
//! from its messages.

use crate::error::{PipelineError, PipelineResult};
use crate::partition::PartitionHash;

/// Deployment configuration shared by all stage handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Prefix listed for input documents.
    pub input_prefix: String,
    /// Stopword object location.
    pub stopwords_path: String,
    /// Prefix for final results.
    pub output_prefix: String,
    /// Shuffle fan-out for new runs.
    pub bucket_count: usize,
    /// Digest for new runs.
    pub partition_hash: PartitionHash,
    /// Required suffix of input documents; empty accepts everything.
    pub input_suffix: String,
    /// Delivery attempts before a message is dead-lettered.
    pub max_delivery_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_prefix: "input/".to_string(),
            stopwords_path: "config/StopWords".to_string(),
            output_prefix: "output/".to_string(),
            bucket_count: 5,
            partition_hash: PartitionHash::Xxh64,
            input_suffix: ".txt".to_string(),
            max_delivery_attempts: 5,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> PipelineResult<T> {
    raw.trim().parse().map_err(|_| {
        PipelineError::InvalidConfig(format!("{} is not a valid value: {:?}", name, raw))
    })
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            input_prefix: lookup("INPUT_PATH").unwrap_or(defaults.input_prefix),
            stopwords_path: lookup("STOP_WORDS_PATH").unwrap_or(defaults.stopwords_path),
            output_prefix: lookup("OUTPUT_PATH").unwrap_or(defaults.output_prefix),
            bucket_count: match lookup("SHUFFLER_HASH_MODULO") {
                Some(raw) => parse_var("SHUFFLER_HASH_MODULO", &raw)?,
                None => defaults.bucket_count,
            },
            partition_hash: match lookup("PARTITION_HASH") {
                Some(raw) => PartitionHash::from_name(&raw).ok_or_else(|| {
                    PipelineError::InvalidConfig(format!("unknown PARTITION_HASH: {:?}", raw))
                })?,
                None => defaults.partition_hash,
            },
            input_suffix: lookup("INPUT_SUFFIX").unwrap_or(defaults.input_suffix),
            max_delivery_attempts: match lookup("MAX_DELIVERY_ATTEMPTS") {
                Some(raw) => parse_var("MAX_DELIVERY_ATTEMPTS", &raw)?,
                None => defaults.max_delivery_attempts,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the bucket count.
    pub fn with_bucket_count(mut self, bucket_count: usize) -> Self {
        self.bucket_count = bucket_count;
        self
    }

    /// Override the partition digest.
    pub fn with_partition_hash(mut self, partition_hash: PartitionHash) -> Self {
        self.partition_hash = partition_hash;
        self
    }

    /// Reject configurations no run can start with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.bucket_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "SHUFFLER_HASH_MODULO must be a positive integer".to_string(),
            ));
        }
        if self.max_delivery_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "MAX_DELIVERY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.stopwords_path.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "STOP_WORDS_PATH must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
