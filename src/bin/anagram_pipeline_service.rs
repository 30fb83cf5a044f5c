//! Anagram Pipeline Service Binary
//!
//! Runs the pipeline as a REST API service with a background worker:
//! - Structured JSON logging for Cloud Logging
//! - Request tracing with correlation IDs
//! - Graceful shutdown handling
//! - Health check endpoints
//!
//! ## Configuration
//!
//! Environment variables (pipeline settings are documented in
//! `anagram_pipeline::config`):
//! - `STORE_BACKEND`: "memory" or "postgres" (default: memory)
//! - `DATABASE_URL`: PostgreSQL connection string (postgres backend)
//! - `SEED_DIR`: directory whose files are copied into the store at startup
//! - `WORKER_POLL_MS`: queue poll interval of the background worker (default: 50)
//! - `PORT`: Service port (default: 8002)
//! - `HOST`: Service host (default: 0.0.0.0)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! SEED_DIR=./corpus LOG_FORMAT=pretty cargo run --bin anagram_pipeline_service --features service
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use walkdir::WalkDir;

use anagram_pipeline::dispatch::Dispatcher;
use anagram_pipeline::service::{create_router, metrics_middleware, record_drain_metrics, ServiceState};
use anagram_pipeline::store::{BlobStore, InMemoryBlobStore, PostgresBlobStore};
use anagram_pipeline::PipelineConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "anagram_pipeline_service=info,anagram_pipeline=info,tower_http=info,sqlx=warn".into()
    });

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

/// Request logging middleware that adds correlation ID and timing
async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let trace_id = request
        .headers()
        .get("X-Cloud-Trace-Context")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split('/').next().unwrap_or(s).to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);

    info!(
        target: "anagram_pipeline_service::access",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request completed"
    );

    response
}

/// Copy every file under `dir` into the store, keyed by its relative path.
async fn seed_store<S: BlobStore>(store: &S, dir: &Path) -> Result<usize, BoxError> {
    let mut seeded = 0;

    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let key = seed_key(dir, entry.path())?;
        let bytes = tokio::fs::read(entry.path()).await?;
        store.put(&key, bytes).await?;
        seeded += 1;
    }

    Ok(seeded)
}

/// Store key of a seeded file: its path relative to `root`, `/`-separated.
fn seed_key(root: &Path, path: &Path) -> Result<String, BoxError> {
    Ok(path
        .strip_prefix(root)?
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Drain the queue until shutdown is signalled.
async fn run_worker<S: BlobStore + 'static>(
    dispatcher: Arc<Dispatcher<S>>,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(poll_ms = poll.as_millis() as u64, "Background worker started");
    loop {
        let start = Instant::now();
        let summary = dispatcher.drain().await;
        if summary.total() > 0 {
            record_drain_metrics(&summary, start.elapsed().as_millis() as u64);
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("Background worker stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

async fn serve<S: BlobStore + 'static>(state: ServiceState<S>) -> Result<(), BoxError> {
    let version = env!("CARGO_PKG_VERSION");

    if let Ok(seed_dir) = std::env::var("SEED_DIR") {
        let seeded = seed_store(state.store.as_ref(), Path::new(&seed_dir)).await?;
        info!(seed_dir = %seed_dir, objects = seeded, "Seeded blob store");
    }

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8002);
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let poll = Duration::from_millis(
        std::env::var("WORKER_POLL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50),
    );

    let (stop_worker, worker_shutdown) = watch::channel(false);
    let worker = tokio::spawn(run_worker(
        Arc::clone(&state.dispatcher),
        poll,
        worker_shutdown,
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(address = %addr, version = version, "Anagram Pipeline Service listening");

    let listener = TcpListener::bind(addr).await?;
    info!("Ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_worker.send(true);
    worker.await?;

    info!("Anagram Pipeline Service shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    let build_sha = option_env!("BUILD_SHA").unwrap_or("dev");
    info!(version = version, build_sha = build_sha, "Starting Anagram Pipeline Service");

    let config = PipelineConfig::from_env()?;
    info!(
        input_prefix = %config.input_prefix,
        stopwords_path = %config.stopwords_path,
        output_prefix = %config.output_prefix,
        bucket_count = config.bucket_count,
        partition_hash = config.partition_hash.name(),
        "Pipeline configuration loaded"
    );

    let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".to_string());
    match backend.as_str() {
        "memory" => serve(ServiceState::new(InMemoryBlobStore::new(), config, "memory")).await,
        "postgres" => {
            info!("Connecting to PostgreSQL...");
            let connect_start = Instant::now();

            let store = match tokio::time::timeout(
                Duration::from_secs(30),
                PostgresBlobStore::from_env(),
            )
            .await
            {
                Ok(Ok(store)) => store,
                Ok(Err(e)) => {
                    error!(error = %e, "Failed to connect to PostgreSQL");
                    return Err(e.into());
                }
                Err(_) => {
                    error!("PostgreSQL connection timeout after 30s");
                    return Err("Database connection timeout".into());
                }
            };
            store.ensure_schema().await?;

            info!(
                latency_ms = connect_start.elapsed().as_millis() as u64,
                "PostgreSQL connection established"
            );
            serve(ServiceState::new(store, config, "postgres")).await
        }
        other => Err(format!("unknown STORE_BACKEND: {:?}", other).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_store_copies_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("input/nested")).unwrap();
        std::fs::write(dir.path().join("stopwords.txt"), "the,a").unwrap();
        std::fs::write(dir.path().join("input/doc1.txt"), "listen silent").unwrap();
        std::fs::write(dir.path().join("input/nested/doc2.txt"), "enlist").unwrap();

        let store = InMemoryBlobStore::new();
        let seeded = seed_store(&store, dir.path()).await.unwrap();

        assert_eq!(seeded, 3);
        assert_eq!(
            store.get("input/nested/doc2.txt").await.unwrap(),
            Some(b"enlist".to_vec())
        );
        let mut keys = store.list("").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["input/doc1.txt", "input/nested/doc2.txt", "stopwords.txt"]
        );
    }

    #[test]
    fn test_seed_key_uses_forward_slashes() {
        let root = Path::new("/seed");
        let key = seed_key(root, &root.join("input").join("doc.txt")).unwrap();
        assert_eq!(key, "input/doc.txt");
    }
}
