//! Repository layer for database persistence.
//!
//! Each table has a module of connection-level functions so that the
//! orchestrator can compose multi-table invariants inside one transaction.
//! Pool-holding convenience types wrap the common single-call paths.

pub mod jobs;
pub mod locks;
pub mod migrations;
pub mod pool;
pub mod records;
pub mod steps;
pub mod user_work;
pub mod work_items;

pub use jobs::JobRepository;
pub use migrations::run_migrations;
pub use pool::{AsyncSqliteConnection, AsyncSqlitePool, DieselError};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Canonical timestamp encoding for TEXT columns: fixed-width RFC 3339 UTC,
/// so lexicographic comparison in SQL matches chronological order.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_string() -> String {
    format_datetime(Utc::now())
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
