//! Anagram Pipeline REST Service
//!
//! Starts runs and reports their progress over HTTP. Stage messages are
//! processed by a background worker draining the local dispatcher.
//!
//! ## Endpoints
//!
//! - `POST /api/runs` - Start a run
//! - `GET /api/runs/:run_id` - Run status
//! - `GET /api/dead-letters` - Messages the worker gave up on
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_drain_metrics};
pub use routes::{create_router, status_for, ErrorResponse};
pub use state::ServiceState;
