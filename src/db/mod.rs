//! SQLite connection management shared by the cursor store and the pool index.
//!
//! # Architecture
//!
//! - One database file holds both durable stores: scan cursors (with gap list
//!   and slot-hash history) and the pool index
//! - WAL mode so `query` readers never block the scanning writer
//! - Embedded migrations from `migrations/`, applied on every start
//!
//! # Tables
//!
//! | Table                    | Owner         |
//! |--------------------------|---------------|
//! | `scan_cursors`           | cursor store  |
//! | `scan_gaps`              | cursor store  |
//! | `slot_hashes`            | cursor store  |
//! | `pool_creations`         | pool index    |
//! | `swaps`                  | pool index    |
//! | `invalidations`          | pool index    |
//! | `consistency_violations` | pool index    |
//! | `decode_anomalies`       | pool index    |

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{IndexerError, IndexerResult};

/// Tables that must exist after migrations.
pub const REQUIRED_TABLES: [&str; 8] = [
    "scan_cursors",
    "scan_gaps",
    "slot_hashes",
    "pool_creations",
    "swaps",
    "invalidations",
    "consistency_violations",
    "decode_anomalies",
];

/// Creates a SQLite connection pool, applies migrations and verifies the schema.
///
/// # Configuration
///
/// - **WAL mode**: concurrent readers during writes
/// - **Synchronous NORMAL**: durable at every WAL checkpoint, fast commits
/// - **Busy timeout**: 30 seconds to ride out lock contention
/// - **Max connections**: 5, or 1 for `:memory:` databases (every
///   connection to `:memory:` opens a separate database)
///
/// # Example
///
/// ```no_run
/// use solana_pool_indexer::db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool("sqlite:./indexer.db").await?;
///     // Hand the pool to CursorStore / PoolIndex
///     Ok(())
/// }
/// ```
///
/// # Errors
///
/// Returns a database error if the URL is invalid, the file cannot be opened,
/// or migrations fail.
pub async fn create_pool(database_url: &str) -> IndexerResult<SqlitePool> {
    info!(database_url, "Connecting to database");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to parse database URL: {database_url}"),
                Some(Box::new(e)),
            )
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30))
        .foreign_keys(true);

    let in_memory = database_url.contains(":memory:");
    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5));
    if in_memory {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        IndexerError::database(
            format!("Failed to connect to database at {database_url}"),
            Some(Box::new(e)),
        )
    })?;

    info!("Running database migrations");
    run_migrations(&pool).await?;
    verify_database(&pool).await?;
    info!("Database migrations complete");

    Ok(pool)
}

/// Applies all pending migrations from the `migrations/` directory.
///
/// # Errors
///
/// Returns a database error if a migration fails.
pub async fn run_migrations(pool: &SqlitePool) -> IndexerResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            IndexerError::database("Failed to run database migrations", Some(Box::new(e)))
        })?;

    Ok(())
}

/// Verify that required tables exist after migrations.
///
/// # Errors
///
/// Returns a database error naming the missing tables.
pub async fn verify_database(pool: &SqlitePool) -> IndexerResult<()> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT name FROM sqlite_master WHERE type = 'table'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| IndexerError::database("Failed to verify database schema", Some(Box::new(e))))?;

    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|table| !rows.iter().any(|(name,)| name == table))
        .collect();

    if !missing.is_empty() {
        return Err(IndexerError::database(
            format!("Database schema incomplete. Missing tables: {}", missing.join(", ")),
            None,
        ));
    }

    Ok(())
}

/// Current unix time in seconds, used for `*_at` columns.
#[must_use]
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Slots are `u64` on chain and `INTEGER` (i64) in SQLite.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn slot_to_db(slot: u64) -> i64 {
    slot as i64
}

/// Inverse of [`slot_to_db`].
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn slot_from_db(slot: i64) -> u64 {
    slot as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_and_migrations() {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        // Migrations are idempotent
        run_migrations(&pool)
            .await
            .expect("Failed to rerun migrations");

        verify_database(&pool).await.expect("schema complete");
    }

    #[tokio::test]
    async fn test_wal_mode_on_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite:{}", dir.path().join("wal.db").display());
        let pool = create_pool(&url).await.expect("Failed to create pool");

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("Failed to query journal mode");

        assert_eq!(result.0, "wal");
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("Failed to query foreign keys");

        assert_eq!(result.0, 1);
    }

    #[test]
    fn test_slot_conversion() {
        assert_eq!(slot_from_db(slot_to_db(300_000_000)), 300_000_000);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = create_pool("postgres://nope").await;
        assert!(matches!(result, Err(IndexerError::DatabaseError { .. })));
    }
}
