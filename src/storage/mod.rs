//! Embedded storage engine: a single SQLite database file with write-ahead
//! logging, a full-text index over learning content, and a blob column for
//! embeddings. Everything above this module speaks async `sqlx`.

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};

use crate::errors::TxResult;

pub mod schema;

/// Open (creating if missing) the database at `path` and bring the schema
/// up to date. The parent directory is created on demand.
pub async fn connect(path: &Path) -> TxResult<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    schema::migrate(&pool).await?;
    Ok(pool)
}

/// Begin a write transaction that takes the database lock up front.
///
/// Multi-statement writes and optimistic-locking checks go through here so
/// concurrent writers queue on the busy handler instead of failing at
/// commit time.
pub async fn begin_immediate(pool: &SqlitePool) -> TxResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Current wall-clock time as UTC epoch milliseconds, the storage
/// representation of every timestamp.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Decode a stored millisecond timestamp. Out-of-range values collapse to
/// the epoch rather than panicking.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Encode a timestamp for storage.
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
