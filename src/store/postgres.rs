//! PostgreSQL blob store for durable deployments.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Schema
//!
//! One table keyed by path. A single-statement upsert gives atomic,
//! overwrite-safe writes; listing is strongly consistent, which is stronger
//! than the pipeline requires.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

use super::BlobStore;

/// DDL for the object table.
pub const OBJECT_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pipeline_objects (
    path TEXT PRIMARY KEY,
    body BYTEA NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/anagram_pipeline".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Error type for PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// PostgreSQL blob store.
pub struct PostgresBlobStore {
    pool: PgPool,
}

impl PostgresBlobStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, PostgresError> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, PostgresError> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Create the object table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), PostgresError> {
        sqlx::query(OBJECT_TABLE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for PostgresBlobStore {
    type Error = PostgresError;

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let row = sqlx::query("SELECT body FROM pipeline_objects WHERE path = $1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(r.try_get::<Vec<u8>, _>("body")?)),
            None => Ok(None),
        }
    }

    async fn put(&self, path: &str, body: Vec<u8>) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_objects (path, body, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (path) DO UPDATE
            SET body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(path)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Self::Error> {
        let rows = sqlx::query(
            "SELECT path FROM pipeline_objects WHERE starts_with(path, $1) ORDER BY path",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("path").map_err(PostgresError::from))
            .collect()
    }

    async fn delete_all(&self, prefix: &str) -> Result<usize, Self::Error> {
        let result = sqlx::query("DELETE FROM pipeline_objects WHERE starts_with(path, $1)")
            .bind(prefix)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn exists(&self, path: &str) -> Result<bool, Self::Error> {
        let row = sqlx::query("SELECT 1 FROM pipeline_objects WHERE path = $1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
