//! Durable message store.
//!
//! The store assigns message identity on `create` and lists persisted messages
//! in identity order. Backends:
//! - SQLite (feature `sqlite`, default)
//! - PostgreSQL (feature `postgres`)
//! - In-memory mock for tests

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::model::{DomainMessage, NewMessage};

pub mod mock;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockMessageStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresMessageStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMessageStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised by a message store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored message {id} is unreadable: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage backend not enabled: {0}")]
    NotEnabled(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable persistence for domain messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return it with its assigned identity.
    async fn create(&self, message: NewMessage) -> Result<DomainMessage>;

    /// All persisted messages, oldest identity first.
    async fn list(&self) -> Result<Vec<DomainMessage>>;
}

/// Open the configured backend and make sure its schema exists.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn MessageStore>> {
    match config.storage_type {
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

                if let Some(parent) = std::path::Path::new(&config.sqlite.path).parent() {
                    std::fs::create_dir_all(parent)?;
                }

                let opts = SqliteConnectOptions::new()
                    .filename(&config.sqlite.path)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(std::time::Duration::from_secs(30))
                    .create_if_missing(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(opts)
                    .await?;
                let store = SqliteMessageStore::new(pool);
                store.init().await?;
                info!(storage_type = "sqlite", path = %config.sqlite.path, "Storage initialized");
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "sqlite"))]
            {
                Err(StorageError::NotEnabled("sqlite"))
            }
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.postgres.max_connections)
                    .connect(&config.postgres.uri)
                    .await?;
                let store = PostgresMessageStore::new(pool);
                store.init().await?;
                info!(storage_type = "postgres", "Storage initialized");
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "postgres"))]
            {
                Err(StorageError::NotEnabled("postgres"))
            }
        }
    }
}

/// Parse a stored RFC 3339 timestamp.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn parse_created_at(id: i64, raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| StorageError::Corrupt {
            id,
            reason: format!("invalid created_at {:?}: {}", raw, e),
        })
}
