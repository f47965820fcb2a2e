//! SQLite implementations of the proof store and mapping index
//!
//! Both share one pool. The store owns the append lock and the sequence
//! counter; the mapping writes its rows inside the store's append
//! transaction so a registration and its audit event commit together.

mod mapping;
mod store;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::infra::{ProvenanceError, Result};

pub use mapping::SqliteMappingIndex;
pub use store::SqliteProofStore;

/// Open a pool for `url` (`sqlite://ledger.db`, `sqlite::memory:`).
///
/// In-memory databases get a single connection so every query sees the
/// same database.
pub async fn connect_pool(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let max_connections = if url.contains(":memory:") || url.contains("mode=memory") {
        1
    } else {
        5
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProvenanceError::Internal(format!("invalid timestamp {s}: {e}")))
}
