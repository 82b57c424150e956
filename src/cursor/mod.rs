//! Durable scan cursors.
//!
//! One cursor per scan job. A job is identified by its filter set and the
//! commitment level ([`JobKey`]). Alongside the last indexed slot the store
//! keeps:
//!
//! - the gap list: slots the provider reported as skipped, or whose block
//!   could not be read ([`GapKind`])
//! - the slot-hash history: block hash and parent slot of every indexed slot,
//!   used to detect reorgs
//!
//! The cursor only moves forward through [`CursorStore::advance`] and
//! [`CursorStore::record_gap`]. [`CursorStore::rewind`] and
//! [`CursorStore::rewind_others`] are the only ways back.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument, warn};

use crate::db::{now_timestamp, slot_from_db, slot_to_db};
use crate::error::{IndexerError, IndexerResult};
use crate::rpc::Commitment;
use crate::scanner::TransactionFilter;

/// Identity of a scan job: hex SHA-256 of the canonical filter and commitment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    key: String,
    description: String,
    commitment: Commitment,
}

impl JobKey {
    /// Derive the key for a filter scanned at `commitment`.
    #[must_use]
    pub fn new(filter: &TransactionFilter, commitment: Commitment) -> Self {
        let description = filter.to_string();
        let mut hasher = Sha256::new();
        hasher.update(description.as_bytes());
        hasher.update(b"|");
        hasher.update(commitment.as_str().as_bytes());
        Self {
            key: hex::encode(hasher.finalize()),
            description,
            commitment,
        }
    }

    /// Hex key stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Short prefix for logs.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.key[..12]
    }

    /// Canonical filter description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Commitment level of the job.
    #[must_use]
    pub const fn commitment(&self) -> Commitment {
        self.commitment
    }
}

/// Persisted cursor state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cursor {
    /// Job key
    pub job_key: String,
    /// Canonical filter description
    pub filter: String,
    /// Commitment level the job scans at
    pub commitment: Commitment,
    /// Last slot whose events are durably indexed (or recorded as a gap)
    pub last_slot: u64,
    /// Block hash of `last_slot`, `None` when it was a gap
    pub last_blockhash: Option<String>,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

/// Why a slot has no indexed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GapKind {
    /// The provider reported no block at the slot
    Skipped,
    /// A block exists but could not be read
    Unreadable,
}

impl GapKind {
    /// Stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Unreadable => "unreadable",
        }
    }

    fn from_db(raw: &str) -> Self {
        if raw == "unreadable" {
            Self::Unreadable
        } else {
            Self::Skipped
        }
    }
}

/// A slot without a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    /// Missing slot
    pub slot: u64,
    /// Skipped or unreadable
    pub kind: GapKind,
    /// Provider explanation
    pub reason: String,
    /// Unix timestamp
    pub recorded_at: i64,
}

/// SQLite-backed cursor store.
#[derive(Debug, Clone)]
pub struct CursorStore {
    pool: SqlitePool,
}

impl CursorStore {
    /// Create a store over an initialized pool (see [`crate::db::create_pool`]).
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the cursor of `job`, `None` if the job never indexed a slot.
    ///
    /// # Errors
    ///
    /// `CursorCorruption` if the stored row is inconsistent with the job,
    /// `DatabaseError` if the store is unavailable.
    #[instrument(skip(self), fields(job = job.short()))]
    pub async fn load(&self, job: &JobKey) -> IndexerResult<Option<Cursor>> {
        let row = sqlx::query(
            "SELECT job_key, program_ids, commitment, last_slot, last_blockhash, updated_at
             FROM scan_cursors WHERE job_key = ?",
        )
        .bind(job.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to load scan cursor", Some(Box::new(e))))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let corrupt = |what: &str| IndexerError::cursor_corruption(format!("cursor {}: {what}", job.short()));

        let commitment: String = row.try_get("commitment").map_err(|_| corrupt("unreadable commitment"))?;
        let commitment: Commitment = commitment
            .parse()
            .map_err(|_| corrupt(&format!("unknown commitment '{commitment}'")))?;
        if commitment != job.commitment() {
            return Err(corrupt(&format!(
                "stored commitment {commitment} does not match job commitment {}",
                job.commitment()
            )));
        }

        let last_slot: i64 = row.try_get("last_slot").map_err(|_| corrupt("unreadable last_slot"))?;
        if last_slot < 0 {
            return Err(corrupt(&format!("negative last_slot {last_slot}")));
        }

        Ok(Some(Cursor {
            job_key: row.try_get("job_key").map_err(|_| corrupt("unreadable job_key"))?,
            filter: row.try_get("program_ids").map_err(|_| corrupt("unreadable filter"))?,
            commitment,
            last_slot: slot_from_db(last_slot),
            last_blockhash: row
                .try_get("last_blockhash")
                .map_err(|_| corrupt("unreadable last_blockhash"))?,
            updated_at: row.try_get("updated_at").map_err(|_| corrupt("unreadable updated_at"))?,
        }))
    }

    /// Record `slot` as indexed with its block hash. Call only after the
    /// slot's events are committed to the pool index. The cursor never moves
    /// backwards here; re-advancing to an older slot only refreshes its hash.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the write fails.
    #[instrument(skip(self, blockhash), fields(job = job.short()))]
    pub async fn advance(
        &self,
        job: &JobKey,
        slot: u64,
        blockhash: &str,
        parent_slot: u64,
    ) -> IndexerResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            IndexerError::database("Failed to begin cursor transaction", Some(Box::new(e)))
        })?;

        upsert_cursor(&mut tx, job, slot, Some(blockhash)).await?;

        sqlx::query(
            "INSERT INTO slot_hashes (job_key, slot, blockhash, parent_slot)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(job_key, slot) DO UPDATE SET
                blockhash = excluded.blockhash,
                parent_slot = excluded.parent_slot",
        )
        .bind(job.as_str())
        .bind(slot_to_db(slot))
        .bind(blockhash)
        .bind(slot_to_db(parent_slot))
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::database("Failed to store slot hash", Some(Box::new(e))))?;

        tx.commit().await.map_err(|e| {
            IndexerError::database("Failed to commit cursor advance", Some(Box::new(e)))
        })?;

        debug!(slot, "Cursor advanced");
        Ok(())
    }

    /// Record `slot` as a gap and move the cursor past it.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the write fails.
    #[instrument(skip(self), fields(job = job.short()))]
    pub async fn record_gap(&self, job: &JobKey, slot: u64, kind: GapKind, reason: &str) -> IndexerResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            IndexerError::database("Failed to begin cursor transaction", Some(Box::new(e)))
        })?;

        upsert_cursor(&mut tx, job, slot, None).await?;

        sqlx::query(
            "INSERT INTO scan_gaps (job_key, slot, kind, reason, recorded_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(job_key, slot) DO UPDATE SET
                kind = excluded.kind,
                reason = excluded.reason",
        )
        .bind(job.as_str())
        .bind(slot_to_db(slot))
        .bind(kind.as_str())
        .bind(reason)
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::database("Failed to record gap", Some(Box::new(e))))?;

        tx.commit().await.map_err(|e| {
            IndexerError::database("Failed to commit gap", Some(Box::new(e)))
        })?;

        warn!(error = %IndexerError::data_gap(slot, reason), kind = kind.as_str(), "Recorded gap");
        Ok(())
    }

    /// Gap list of `job` in slot order.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn gaps(&self, job: &JobKey) -> IndexerResult<Vec<Gap>> {
        let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
            "SELECT slot, kind, reason, recorded_at FROM scan_gaps WHERE job_key = ? ORDER BY slot",
        )
        .bind(job.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to load gaps", Some(Box::new(e))))?;

        Ok(rows
            .into_iter()
            .map(|(slot, kind, reason, recorded_at)| Gap {
                slot: slot_from_db(slot),
                kind: GapKind::from_db(&kind),
                reason,
                recorded_at,
            })
            .collect())
    }

    /// Stored block hash of `slot`, if it was indexed.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn blockhash_at(&self, job: &JobKey, slot: u64) -> IndexerResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT blockhash FROM slot_hashes WHERE job_key = ? AND slot = ?",
        )
        .bind(job.as_str())
        .bind(slot_to_db(slot))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to load slot hash", Some(Box::new(e))))?;

        Ok(row.map(|(hash,)| hash))
    }

    /// Highest slot below `slot` with a stored hash, and that hash.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn latest_hashed_slot_below(&self, job: &JobKey, slot: u64) -> IndexerResult<Option<(u64, String)>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT slot, blockhash FROM slot_hashes
             WHERE job_key = ? AND slot < ?
             ORDER BY slot DESC LIMIT 1",
        )
        .bind(job.as_str())
        .bind(slot_to_db(slot))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to load slot hash", Some(Box::new(e))))?;

        Ok(row.map(|(slot, hash)| (slot_from_db(slot), hash)))
    }

    /// Whether `slot` was recorded as skipped by the provider.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn is_skipped(&self, job: &JobKey, slot: u64) -> IndexerResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT slot FROM scan_gaps WHERE job_key = ? AND slot = ? AND kind = 'skipped'",
        )
        .bind(job.as_str())
        .bind(slot_to_db(slot))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to load gap", Some(Box::new(e))))?;

        Ok(row.is_some())
    }

    /// Move the cursor back to `to_slot`, forgetting hashes and gaps above it.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the write fails.
    #[instrument(skip(self), fields(job = job.short()))]
    pub async fn rewind(&self, job: &JobKey, to_slot: u64) -> IndexerResult<()> {
        let rewound = self.rewind_where("job_key = ?", job, to_slot).await?;
        if rewound > 0 {
            info!(to_slot, "Cursor rewound");
        }
        Ok(())
    }

    /// Rewind every other job whose cursor is past `to_slot`. Their index rows
    /// above it were invalidated by a rollback of `job`, so they rescan.
    /// Returns the number of jobs rewound.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the write fails.
    #[instrument(skip(self), fields(job = job.short()))]
    pub async fn rewind_others(&self, job: &JobKey, to_slot: u64) -> IndexerResult<u64> {
        let rewound = self.rewind_where("job_key <> ?", job, to_slot).await?;
        if rewound > 0 {
            info!(to_slot, jobs = rewound, "Rewound other jobs sharing the index");
        }
        Ok(rewound)
    }

    async fn rewind_where(&self, jobs: &str, job: &JobKey, to_slot: u64) -> IndexerResult<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            IndexerError::database("Failed to begin cursor transaction", Some(Box::new(e)))
        })?;

        for table in ["slot_hashes", "scan_gaps"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE {jobs} AND slot > ?"))
                .bind(job.as_str())
                .bind(slot_to_db(to_slot))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    IndexerError::database(format!("Failed to rewind {table}"), Some(Box::new(e)))
                })?;
        }

        let result = sqlx::query(&format!(
            "UPDATE scan_cursors SET
                last_slot = ?,
                last_blockhash = (
                    SELECT h.blockhash FROM slot_hashes h
                    WHERE h.job_key = scan_cursors.job_key AND h.slot = ?
                ),
                updated_at = ?
             WHERE {jobs} AND last_slot > ?"
        ))
        .bind(slot_to_db(to_slot))
        .bind(slot_to_db(to_slot))
        .bind(now_timestamp())
        .bind(job.as_str())
        .bind(slot_to_db(to_slot))
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::database("Failed to rewind cursor", Some(Box::new(e))))?;

        tx.commit().await.map_err(|e| {
            IndexerError::database("Failed to commit cursor rewind", Some(Box::new(e)))
        })?;

        Ok(result.rows_affected())
    }

    /// Every job cursor, most recently updated first.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn all(&self) -> IndexerResult<Vec<Cursor>> {
        let rows: Vec<(String, String, String, i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT job_key, program_ids, commitment, last_slot, last_blockhash, updated_at
             FROM scan_cursors ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to list cursors", Some(Box::new(e))))?;

        rows.into_iter()
            .map(|(job_key, filter, commitment, last_slot, last_blockhash, updated_at)| {
                let commitment = commitment.parse().map_err(|_| {
                    IndexerError::cursor_corruption(format!(
                        "cursor {job_key}: unknown commitment '{commitment}'"
                    ))
                })?;
                Ok(Cursor {
                    job_key,
                    filter,
                    commitment,
                    last_slot: slot_from_db(last_slot),
                    last_blockhash,
                    updated_at,
                })
            })
            .collect()
    }
}

async fn upsert_cursor(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    job: &JobKey,
    slot: u64,
    blockhash: Option<&str>,
) -> IndexerResult<()> {
    sqlx::query(
        "INSERT INTO scan_cursors (job_key, program_ids, commitment, last_slot, last_blockhash, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(job_key) DO UPDATE SET
            last_slot = excluded.last_slot,
            last_blockhash = excluded.last_blockhash,
            updated_at = excluded.updated_at
         WHERE excluded.last_slot >= scan_cursors.last_slot",
    )
    .bind(job.as_str())
    .bind(job.description())
    .bind(job.commitment().as_str())
    .bind(slot_to_db(slot))
    .bind(blockhash)
    .bind(now_timestamp())
    .execute(&mut **tx)
    .await
    .map_err(|e| IndexerError::database("Failed to update scan cursor", Some(Box::new(e))))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;

    async fn store() -> CursorStore {
        CursorStore::new(create_pool("sqlite::memory:").await.expect("pool"))
    }

    fn job() -> JobKey {
        JobKey::new(&TransactionFilter::for_programs(["Prog"]), Commitment::Confirmed)
    }

    #[test]
    fn test_job_key_depends_on_filter_and_commitment() {
        let a = JobKey::new(&TransactionFilter::for_programs(["A", "B"]), Commitment::Confirmed);
        let b = JobKey::new(&TransactionFilter::for_programs(["B", "A"]), Commitment::Confirmed);
        let c = JobKey::new(&TransactionFilter::for_programs(["A", "B"]), Commitment::Finalized);
        assert_eq!(a, b);
        assert_ne!(a.as_str(), c.as_str());
        assert_eq!(a.as_str().len(), 64);
    }

    #[tokio::test]
    async fn test_advance_and_load() {
        let store = store().await;
        let job = job();
        assert!(store.load(&job).await.expect("load").is_none());

        store.advance(&job, 100, "h100", 99).await.expect("advance");
        store.advance(&job, 101, "h101", 100).await.expect("advance");

        let cursor = store.load(&job).await.expect("load").expect("cursor");
        assert_eq!(cursor.last_slot, 101);
        assert_eq!(cursor.last_blockhash.as_deref(), Some("h101"));
        assert_eq!(store.blockhash_at(&job, 100).await.expect("hash").as_deref(), Some("h100"));
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards_on_advance() {
        let store = store().await;
        let job = job();
        store.advance(&job, 105, "h105", 104).await.expect("advance");
        store.advance(&job, 101, "h101", 100).await.expect("re-advance");

        let cursor = store.load(&job).await.expect("load").expect("cursor");
        assert_eq!(cursor.last_slot, 105);
    }

    #[tokio::test]
    async fn test_gap_recorded_and_cursor_moves_past_it() {
        let store = store().await;
        let job = job();
        store.advance(&job, 100, "h100", 99).await.expect("advance");
        store.record_gap(&job, 101, GapKind::Skipped, "slot skipped").await.expect("gap");

        let cursor = store.load(&job).await.expect("load").expect("cursor");
        assert_eq!(cursor.last_slot, 101);
        assert_eq!(cursor.last_blockhash, None);

        let gaps = store.gaps(&job).await.expect("gaps");
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].slot, 101);
        assert_eq!(gaps[0].reason, "slot skipped");
        assert_eq!(gaps[0].kind, GapKind::Skipped);
        assert!(store.is_skipped(&job, 101).await.expect("gap lookup"));
        assert!(!store.is_skipped(&job, 100).await.expect("gap lookup"));
    }

    #[tokio::test]
    async fn test_unreadable_block_is_not_a_skip() {
        let store = store().await;
        let job = job();
        store
            .record_gap(&job, 101, GapKind::Unreadable, "block unreadable: bad json")
            .await
            .expect("gap");

        assert!(!store.is_skipped(&job, 101).await.expect("gap lookup"));
        assert_eq!(store.gaps(&job).await.expect("gaps")[0].kind, GapKind::Unreadable);
    }

    #[tokio::test]
    async fn test_latest_hashed_slot_below() {
        let store = store().await;
        let job = job();
        store.advance(&job, 100, "h100", 99).await.expect("advance");
        store.record_gap(&job, 101, GapKind::Skipped, "skipped").await.expect("gap");
        store.advance(&job, 102, "h102", 100).await.expect("advance");

        let latest = store.latest_hashed_slot_below(&job, 104).await.expect("read");
        assert_eq!(latest, Some((102, "h102".to_string())));
        let latest = store.latest_hashed_slot_below(&job, 102).await.expect("read");
        assert_eq!(latest, Some((100, "h100".to_string())));
        assert!(store.latest_hashed_slot_below(&job, 100).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_rewind_forgets_later_state() {
        let store = store().await;
        let job = job();
        store.advance(&job, 100, "h100", 99).await.expect("advance");
        store.record_gap(&job, 101, GapKind::Skipped, "skipped").await.expect("gap");
        store.advance(&job, 102, "h102", 100).await.expect("advance");

        store.rewind(&job, 100).await.expect("rewind");

        let cursor = store.load(&job).await.expect("load").expect("cursor");
        assert_eq!(cursor.last_slot, 100);
        assert_eq!(cursor.last_blockhash.as_deref(), Some("h100"));
        assert!(store.gaps(&job).await.expect("gaps").is_empty());
        assert!(store.blockhash_at(&job, 102).await.expect("hash").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_cursor_detected() {
        let store = store().await;
        let job = job();
        store.advance(&job, 100, "h100", 99).await.expect("advance");

        sqlx::query("UPDATE scan_cursors SET commitment = 'bogus'")
            .execute(&store.pool)
            .await
            .expect("tamper");

        let err = store.load(&job).await.expect_err("corruption");
        assert!(matches!(err, IndexerError::CursorCorruption { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_jobs_are_isolated() {
        let store = store().await;
        let a = job();
        let b = JobKey::new(&TransactionFilter::for_programs(["Other"]), Commitment::Confirmed);
        store.advance(&a, 10, "h10", 9).await.expect("advance");

        assert!(store.load(&b).await.expect("load").is_none());
        assert_eq!(store.all().await.expect("all").len(), 1);
    }

    #[tokio::test]
    async fn test_rewind_others_moves_only_other_jobs_past_the_slot() {
        let store = store().await;
        let a = job();
        let b = JobKey::new(&TransactionFilter::for_programs(["B"]), Commitment::Confirmed);
        let c = JobKey::new(&TransactionFilter::for_programs(["C"]), Commitment::Confirmed);
        for slot in 100..=103 {
            store.advance(&a, slot, &format!("a{slot}"), slot - 1).await.expect("advance");
        }
        for slot in 100..=102 {
            store.advance(&b, slot, &format!("b{slot}"), slot - 1).await.expect("advance");
        }
        store.advance(&c, 100, "c100", 99).await.expect("advance");

        let rewound = store.rewind_others(&a, 100).await.expect("rewind");
        assert_eq!(rewound, 1);

        let b_cursor = store.load(&b).await.expect("load").expect("cursor");
        assert_eq!(b_cursor.last_slot, 100);
        assert_eq!(b_cursor.last_blockhash.as_deref(), Some("b100"));
        assert!(store.blockhash_at(&b, 101).await.expect("hash").is_none());

        // The detecting job and jobs behind the slot are untouched
        assert_eq!(store.load(&a).await.expect("load").expect("cursor").last_slot, 103);
        assert_eq!(store.load(&c).await.expect("load").expect("cursor").last_slot, 100);
    }
}
