//! Service middleware for request metrics.
//!
//! ## Metrics Exposed
//!
//! - `request` - request count and latency by path pattern, method, status
//! - `drain` - deliveries processed per background worker pass
//!
//! Metrics are emitted as tracing events under the
//! `anagram_pipeline::metrics` target and aggregated from logs.

use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

use crate::dispatch::DrainSummary;

/// Metrics middleware that records request counts and latency.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "anagram_pipeline::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Replaces the run id segment of `/api/runs/{id}` with a placeholder.
fn normalize_path(path: &str) -> String {
    static RUN_PATH: OnceLock<regex_lite::Regex> = OnceLock::new();
    let run_path = RUN_PATH.get_or_init(|| {
        regex_lite::Regex::new(r"^/api/runs/[A-Za-z0-9_-]+").expect("run path pattern is valid")
    });

    run_path.replace(path, "/api/runs/:run_id").to_string()
}

/// Record one background worker pass.
pub fn record_drain_metrics(summary: &DrainSummary, latency_ms: u64) {
    info!(
        target: "anagram_pipeline::metrics",
        metric_type = "drain",
        handled = summary.handled,
        skipped = summary.skipped,
        retried = summary.retried,
        dead_lettered = summary.dead_lettered,
        completed = summary.completed,
        latency_ms = latency_ms,
        "drain_metric"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_replaces_run_id() {
        assert_eq!(normalize_path("/api/runs/9f2c4e1a0b3d5f67"), "/api/runs/:run_id");
    }

    #[test]
    fn test_normalize_path_preserves_regular_path() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
        assert_eq!(normalize_path("/api/runs"), "/api/runs");
    }
}
