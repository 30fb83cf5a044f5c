//! Axum routes for the anagram pipeline service.

use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::controller::StartOptions;
use crate::dispatch::DeadLetter;
use crate::error::PipelineError;
use crate::store::BlobStore;
use crate::types::{RunHandle, RunId, RunStatus};
use crate::PIPELINE_SCHEMA_VERSION;

use super::state::ServiceState;

type SharedState<S> = Arc<ServiceState<S>>;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request/Response Types
// ============================================================================

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub schema_version: String,
    pub backend: String,
    pub store_connected: bool,
    pub queue_depth: usize,
    pub dead_letters: usize,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub store: bool,
    pub details: Option<String>,
}

/// Dead letters collected by the worker.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterListResponse {
    pub count: usize,
    pub dead_letters: Vec<DeadLetter>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// HTTP status for a pipeline error.
pub fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::InputNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::MalformedPayload(_) | PipelineError::InvalidConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::TransientIo(_) | PipelineError::CorruptObject { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn api_error(err: PipelineError) -> ApiError {
    let status = status_for(&err);
    tracing::warn!(code = err.code(), status = status.as_u16(), error = %err, "Request failed");
    (status, Json(ErrorResponse::new(err.code(), err.to_string())))
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Start a run. An empty body uses the configured defaults.
async fn start_run_handler<S: BlobStore + 'static>(
    State(state): State<SharedState<S>>,
    body: Bytes,
) -> Result<(StatusCode, Json<RunHandle>), ApiError> {
    let options = if body.iter().all(u8::is_ascii_whitespace) {
        StartOptions::default()
    } else {
        serde_json::from_slice::<StartOptions>(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(
                    ErrorResponse::new("INVALID_REQUEST", format!("Invalid start request: {}", e))
                        .with_details(String::from_utf8_lossy(&body).into_owned()),
                ),
            )
        })?
    };

    let handle = state.controller().start_with(options).await.map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// Report where a run stands.
async fn run_status_handler<S: BlobStore + 'static>(
    State(state): State<SharedState<S>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, ApiError> {
    let run_id = RunId::parse(&run_id).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("INVALID_RUN_ID", e.to_string()).with_details(run_id.clone())),
        )
    })?;

    let status = state.controller().status(&run_id).await.map_err(api_error)?;
    Ok(Json(status))
}

/// List dead-lettered messages.
async fn dead_letters_handler<S: BlobStore + 'static>(
    State(state): State<SharedState<S>>,
) -> Json<DeadLetterListResponse> {
    let dead_letters = state.dispatcher.dead_letters();
    Json(DeadLetterListResponse {
        count: dead_letters.len(),
        dead_letters,
    })
}

/// Health check endpoint (detailed).
async fn health_handler<S: BlobStore + 'static>(
    State(state): State<SharedState<S>>,
) -> Json<HealthResponse> {
    let store_connected = state.store.is_healthy().await;

    Json(HealthResponse {
        status: if store_connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: PIPELINE_SCHEMA_VERSION.to_string(),
        backend: state.backend().to_string(),
        store_connected,
        queue_depth: state.queue_depth(),
        dead_letters: state.dispatcher.dead_letters().len(),
    })
}

/// Liveness probe endpoint. Does not check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint. Returns 503 while the store is unreachable.
async fn readiness_handler<S: BlobStore + 'static>(
    State(state): State<SharedState<S>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.store.is_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            store: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                store: false,
                details: Some("Blob store unreachable".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the pipeline service.
pub fn create_router<S: BlobStore + 'static>(state: ServiceState<S>) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Run lifecycle
        .route("/api/runs", post(start_run_handler::<S>))
        .route("/api/runs/:run_id", get(run_status_handler::<S>))
        .route("/api/dead-letters", get(dead_letters_handler::<S>))
        // Health checks
        .route("/health", get(health_handler::<S>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S>))
        .with_state(state)
}
