//! SQLite persistence for campaigns, summaries, tags and output templates.
//!
//! The schema is applied on open (idempotent `CREATE IF NOT EXISTS`); the
//! database runs with WAL journaling and foreign keys on, so deleting a
//! campaign cascades through its summaries and their children.

mod campaign;
mod summary;
mod template;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;

pub use summary::{StoredSummary, SummaryQuery};
pub use template::OutputTemplate;

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("campaign name '{name}' for URL '{url}' already exists")]
    DuplicateCampaign { name: String, url: String },

    #[error("campaign {0} not found")]
    CampaignNotFound(String),

    #[error("tag '{key}' not found on campaign {uuid}")]
    TagNotFound { uuid: String, key: String },

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("template '{0}' already exists")]
    DuplicateTemplate(String),

    /// An insert with a RETURNING clause produced no row; treated as a hard
    /// error rather than a silently-zero key.
    #[error("insert returned no row")]
    EmptyInsertReturn,

    #[error("stored data looks broken: {0}")]
    Corrupt(String),
}

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Opens (creating if missing) the database at `path` and applies the
    /// schema.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        debug!(path = %path.display(), "storage opened");

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn to_ns(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

pub(crate) fn from_ns(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

pub(crate) fn dur_to_ns(d: Duration) -> i64 {
    d.as_nanos().min(i64::MAX as u128) as i64
}

pub(crate) fn dur_from_ns(ns: i64) -> Duration {
    Duration::from_nanos(ns.max(0) as u64)
}

/// Maps a unique-constraint violation onto a domain error, passing every
/// other database error through.
pub(crate) fn on_unique_violation(err: sqlx::Error, mapped: StorageError) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => mapped,
        _ => StorageError::Db(err),
    }
}
