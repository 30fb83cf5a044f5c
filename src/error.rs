//! Error taxonomy for stage invocations.
//!
//! Every stage handler returns [`PipelineError`]. The message layer decides
//! whether to redeliver based on [`PipelineError::is_retryable`]:
//!
//! | Variant | Retried | Typical cause |
//! |---------|---------|---------------|
//! | `InputNotFound` | no | missing document, stopwords or stage object |
//! | `TransientIo` | yes | storage/queue failure, object not yet visible |
//! | `CorruptObject` | yes | stage object that does not decode |
//! | `MalformedPayload` | no | message does not match its schema |
//! | `InvalidConfig` | no | bad deployment or run parameters |
//!
//! Duplicate barrier triggers are not errors; handlers absorb them.

/// Error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A required document or object does not exist.
    #[error("Input not found: {0}")]
    InputNotFound(String),
    /// Storage or queue failure that redelivery may resolve.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),
    /// A stage object exists but could not be decoded.
    #[error("Corrupt stage object {path}: {reason}")]
    CorruptObject {
        /// Object path.
        path: String,
        /// Decoder message.
        reason: String,
    },
    /// A message does not match its schema.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    /// Configuration or run parameters are invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Create a transient error from a storage backend error.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::TransientIo(format!("store: {}", e))
    }

    /// Create a transient error from a queue backend error.
    pub fn from_queue<E: std::error::Error>(e: E) -> Self {
        Self::TransientIo(format!("queue: {}", e))
    }

    /// Whether the message layer should redeliver the triggering message.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::CorruptObject { .. })
    }

    /// Stable machine-readable code, used in logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InputNotFound(_) => "INPUT_NOT_FOUND",
            Self::TransientIo(_) => "TRANSIENT_IO",
            Self::CorruptObject { .. } => "CORRUPT_OBJECT",
            Self::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
