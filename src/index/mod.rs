//! Durable pool index: pool → creation record → ordered swap history.
//!
//! # Correlation
//!
//! ```text
//! SwapExecuted(pool = P)
//!   ├─ P has a live creation      → attached   (Inserted)
//!   ├─ P unknown                  → pending    (UnknownPool)
//!   │     ├─ PoolCreated(P) within retention  → attached
//!   │     └─ retention expired / buffer full  → orphan
//!   └─ no pool id                 → orphan     (UnknownPool)
//! ```
//!
//! Pending swaps live in the `swaps` table, so the buffer survives restarts
//! and a replayed slot sees exactly the state it left behind.
//!
//! # Idempotence
//!
//! Event identity is `(signature, instruction index)`. Replaying an event that
//! is already stored is a no-op (`AlreadyIndexed` / `DuplicateSignature`).
//!
//! # Invalidation
//!
//! Reorg rollback never deletes: [`PoolIndex::invalidate_from`] flags rows as
//! invalidated, excluding them from [`PoolIndex::query`] while keeping them
//! for audit.

pub mod models;

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};

use crate::db::{now_timestamp, slot_to_db};
use crate::error::{IndexerError, IndexerResult};
use crate::events::{DomainEvent, EventPosition, PoolCreated, SwapExecuted, Unrecognized};

pub use models::{
    ConsistencyViolation, DecodeAnomaly, IndexStats, InvalidatedEvent, Invalidation, PoolHistory,
    PoolRecord, SwapRecord, SwapStatus,
};
use models::{PoolRow, SwapRow, POOL_COLUMNS, SWAP_COLUMNS};

const DUPLICATE_POOL_CREATION: &str = "duplicate_pool_creation";

/// Result of [`PoolIndex::record_pool_created`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolCreatedOutcome {
    /// First creation for the pool
    Inserted {
        /// Pending swaps attached to the new pool
        promoted_swaps: u64,
    },
    /// Another creation is already recorded; the original is kept
    Duplicate {
        /// Signature of the kept record
        existing_signature: String,
        /// Slot of the kept record
        existing_slot: u64,
    },
    /// This exact event was recorded before
    AlreadyIndexed,
}

/// Result of [`PoolIndex::record_swap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Attached to a known pool
    Inserted,
    /// This exact event was recorded before
    DuplicateSignature,
    /// Pool not known yet; held as pending (or orphaned without a pool id)
    UnknownPool,
}

/// Pending-buffer policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Slots a pending swap waits for its pool before becoming an orphan
    pub retention_slots: u64,
    /// Maximum number of pending swaps; the oldest are orphaned beyond it
    pub pending_capacity: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            retention_slots: 150,
            pending_capacity: 10_000,
        }
    }
}

/// What one [`PoolIndex::apply_slot`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotSummary {
    /// New pools
    pub pools_created: u64,
    /// Rejected duplicate creations
    pub duplicate_pools: u64,
    /// Swaps attached on arrival
    pub swaps_attached: u64,
    /// Swaps held as pending or orphaned on arrival
    pub swaps_unknown_pool: u64,
    /// Pending swaps attached by a creation in this slot
    pub swaps_promoted: u64,
    /// Events skipped because they were already stored
    pub replayed: u64,
    /// Unrecognized instructions recorded
    pub anomalies: u64,
    /// Pending swaps orphaned by retention expiry
    pub expired: u64,
}

impl SlotSummary {
    /// Whether the slot changed the index.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pools_created == 0
            && self.duplicate_pools == 0
            && self.swaps_attached == 0
            && self.swaps_unknown_pool == 0
            && self.anomalies == 0
            && self.expired == 0
    }
}

fn db_err(what: &'static str) -> impl FnOnce(sqlx::Error) -> IndexerError {
    move |e| IndexerError::database(what, Some(Box::new(e)))
}

/// SQLite-backed pool index.
#[derive(Debug, Clone)]
pub struct PoolIndex {
    pool: SqlitePool,
    options: IndexOptions,
}

impl PoolIndex {
    /// Create an index over an initialized pool (see [`crate::db::create_pool`]).
    #[must_use]
    pub const fn new(pool: SqlitePool, options: IndexOptions) -> Self {
        Self { pool, options }
    }

    /// Pending-buffer policy in use.
    #[must_use]
    pub const fn options(&self) -> IndexOptions {
        self.options
    }

    /// Record a pool creation (first seen wins).
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the write fails.
    pub async fn record_pool_created(&self, event: &PoolCreated) -> IndexerResult<PoolCreatedOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin index transaction"))?;
        let outcome = record_pool_created(&mut tx, event).await?;
        tx.commit().await.map_err(db_err("Failed to commit pool creation"))?;
        Ok(outcome)
    }

    /// Record a swap, attaching it, buffering it as pending, or orphaning it.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the write fails.
    pub async fn record_swap(&self, event: &SwapExecuted) -> IndexerResult<SwapOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin index transaction"))?;
        let outcome = record_swap(&mut tx, event, self.options).await?;
        tx.commit().await.map_err(db_err("Failed to commit swap"))?;
        Ok(outcome)
    }

    /// Apply every event of `slot` in one transaction, after orphaning pending
    /// swaps that fell out of the retention window. Safe to call again for the
    /// same slot.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if any write fails; nothing is committed in that case.
    #[instrument(skip(self, events), fields(events = events.len()))]
    pub async fn apply_slot(&self, slot: u64, events: &[DomainEvent]) -> IndexerResult<SlotSummary> {
        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin index transaction"))?;
        let mut summary = SlotSummary {
            expired: expire_pending(&mut tx, slot, self.options.retention_slots).await?,
            ..SlotSummary::default()
        };

        for event in events {
            match event {
                DomainEvent::PoolCreated(created) => match record_pool_created(&mut tx, created).await? {
                    PoolCreatedOutcome::Inserted { promoted_swaps } => {
                        summary.pools_created += 1;
                        summary.swaps_promoted += promoted_swaps;
                    }
                    PoolCreatedOutcome::Duplicate { .. } => summary.duplicate_pools += 1,
                    PoolCreatedOutcome::AlreadyIndexed => summary.replayed += 1,
                },
                DomainEvent::SwapExecuted(swap) => match record_swap(&mut tx, swap, self.options).await? {
                    SwapOutcome::Inserted => summary.swaps_attached += 1,
                    SwapOutcome::UnknownPool => summary.swaps_unknown_pool += 1,
                    SwapOutcome::DuplicateSignature => summary.replayed += 1,
                },
                DomainEvent::Unrecognized(marker) => {
                    if record_anomaly(&mut tx, marker).await? {
                        summary.anomalies += 1;
                    } else {
                        summary.replayed += 1;
                    }
                }
            }
        }

        tx.commit().await.map_err(db_err("Failed to commit slot"))?;

        if !summary.is_empty() {
            debug!(slot, ?summary, "Slot applied");
        }
        Ok(summary)
    }

    /// Pool creation and attached swaps, `None` for unknown pools.
    /// Invalidated rows are excluded.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn query(&self, pool: &str) -> IndexerResult<Option<PoolHistory>> {
        let row: Option<PoolRow> = sqlx::query_as(&format!(
            "SELECT {POOL_COLUMNS} FROM pool_creations WHERE pool = ? AND invalidated = 0"
        ))
        .bind(pool)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to load pool"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let swaps = self
            .swaps_where("pool = ? AND status = 'attached' AND invalidated = 0", Some(pool))
            .await?;

        Ok(Some(PoolHistory {
            creation: row.try_into()?,
            swaps,
        }))
    }

    /// Swaps that were never correlated with a pool.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn orphans(&self) -> IndexerResult<Vec<SwapRecord>> {
        self.swaps_where("status = 'orphan' AND invalidated = 0", None).await
    }

    /// Swaps currently waiting for their pool.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn pending(&self) -> IndexerResult<Vec<SwapRecord>> {
        self.swaps_where("status = 'pending' AND invalidated = 0", None).await
    }

    async fn swaps_where(&self, condition: &str, pool: Option<&str>) -> IndexerResult<Vec<SwapRecord>> {
        let sql = format!(
            "SELECT {SWAP_COLUMNS} FROM swaps WHERE {condition}
             ORDER BY slot, tx_index, instruction_index"
        );
        let mut query = sqlx::query_as::<_, SwapRow>(&sql);
        if let Some(pool) = pool {
            query = query.bind(pool);
        }

        query
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to load swaps"))?
            .into_iter()
            .map(SwapRecord::try_from)
            .collect()
    }

    /// Flag every event at `from_slot` or later as invalidated and write an
    /// audit entry. Swaps of invalidated pools recorded at earlier slots, and
    /// swaps orphaned inside the rolled-back range, return to pending.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if any write fails; nothing is committed in that case.
    #[instrument(skip(self))]
    pub async fn invalidate_from(&self, from_slot: u64, reason: &str) -> IndexerResult<Invalidation> {
        let from = slot_to_db(from_slot);
        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin index transaction"))?;

        let pools: Vec<(String,)> =
            sqlx::query_as("SELECT pool FROM pool_creations WHERE invalidated = 0 AND slot >= ?")
                .bind(from)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err("Failed to select pools to invalidate"))?;

        let pools_invalidated = sqlx::query(
            "UPDATE pool_creations SET invalidated = 1 WHERE invalidated = 0 AND slot >= ?",
        )
        .bind(from)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to invalidate pool creations"))?
        .rows_affected();

        let swaps_invalidated =
            sqlx::query("UPDATE swaps SET invalidated = 1 WHERE invalidated = 0 AND slot >= ?")
                .bind(from)
                .execute(&mut *tx)
                .await
                .map_err(db_err("Failed to invalidate swaps"))?
                .rows_affected();

        let mut detached = 0;
        for (pool,) in &pools {
            detached += sqlx::query(
                "UPDATE swaps SET status = 'pending'
                 WHERE pool = ? AND status = 'attached' AND invalidated = 0",
            )
            .bind(pool)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to detach swaps"))?
            .rows_affected();
        }

        let revived = sqlx::query(
            "UPDATE swaps SET status = 'pending', orphan_reason = NULL, orphaned_at_slot = NULL
             WHERE status = 'orphan' AND invalidated = 0 AND pool IS NOT NULL AND orphaned_at_slot >= ?",
        )
        .bind(from)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to revive orphaned swaps"))?
        .rows_affected();

        for table in ["consistency_violations", "decode_anomalies"] {
            sqlx::query(&format!(
                "UPDATE {table} SET invalidated = 1 WHERE invalidated = 0 AND slot >= ?"
            ))
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to invalidate audit rows"))?;
        }

        let created_at = now_timestamp();
        #[allow(clippy::cast_possible_wrap)]
        let (pools_invalidated, swaps_invalidated) = (pools_invalidated as i64, swaps_invalidated as i64);
        let id = sqlx::query(
            "INSERT INTO invalidations (from_slot, reason, pools_invalidated, swaps_invalidated, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(from)
        .bind(reason)
        .bind(pools_invalidated)
        .bind(swaps_invalidated)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to write invalidation audit entry"))?
        .last_insert_rowid();

        tx.commit().await.map_err(db_err("Failed to commit invalidation"))?;

        warn!(
            from_slot,
            reason,
            pools_invalidated,
            swaps_invalidated,
            detached,
            revived,
            "Invalidated index events"
        );

        Ok(Invalidation {
            id,
            from_slot: from,
            reason: reason.to_string(),
            pools_invalidated,
            swaps_invalidated,
            created_at,
        })
    }

    /// Events superseded by reorgs, in ledger order.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn invalidated_events(&self) -> IndexerResult<Vec<InvalidatedEvent>> {
        sqlx::query_as(
            "SELECT 'pool_created' AS kind, pool, signature, slot, tx_index, instruction_index
             FROM pool_creations WHERE invalidated = 1
             UNION ALL
             SELECT 'swap_executed' AS kind, pool, signature, slot, tx_index, instruction_index
             FROM swaps WHERE invalidated = 1
             ORDER BY slot, tx_index, instruction_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load invalidated events"))
    }

    /// Invalidation audit entries, oldest first.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn invalidations(&self) -> IndexerResult<Vec<Invalidation>> {
        sqlx::query_as(
            "SELECT id, from_slot, reason, pools_invalidated, swaps_invalidated, created_at
             FROM invalidations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load invalidations"))
    }

    /// Live consistency violations, in ledger order.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn consistency_violations(&self) -> IndexerResult<Vec<ConsistencyViolation>> {
        sqlx::query_as(
            "SELECT kind, pool, signature, instruction_index, existing_signature, slot, detail, created_at
             FROM consistency_violations WHERE invalidated = 0 ORDER BY slot, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load consistency violations"))
    }

    /// Live decode anomalies, in ledger order.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn anomalies(&self) -> IndexerResult<Vec<DecodeAnomaly>> {
        sqlx::query_as(
            "SELECT program_id, signature, slot, tx_index, instruction_index, diagnostic
             FROM decode_anomalies WHERE invalidated = 0
             ORDER BY slot, tx_index, instruction_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load decode anomalies"))
    }

    /// Row counts.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the read fails.
    pub async fn stats(&self) -> IndexerResult<IndexStats> {
        sqlx::query_as(
            "SELECT
                (SELECT COUNT(*) FROM pool_creations WHERE invalidated = 0) AS pools,
                (SELECT COUNT(*) FROM swaps WHERE invalidated = 0 AND status = 'attached') AS attached_swaps,
                (SELECT COUNT(*) FROM swaps WHERE invalidated = 0 AND status = 'pending') AS pending_swaps,
                (SELECT COUNT(*) FROM swaps WHERE invalidated = 0 AND status = 'orphan') AS orphan_swaps,
                (SELECT COUNT(*) FROM pool_creations WHERE invalidated = 1)
                    + (SELECT COUNT(*) FROM swaps WHERE invalidated = 1) AS invalidated_events,
                (SELECT COUNT(*) FROM consistency_violations WHERE invalidated = 0) AS violations,
                (SELECT COUNT(*) FROM decode_anomalies WHERE invalidated = 0) AS anomalies",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to load index stats"))
    }
}

async fn record_pool_created(
    conn: &mut SqliteConnection,
    event: &PoolCreated,
) -> IndexerResult<PoolCreatedOutcome> {
    let position = event.position;

    let replay: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM pool_creations
         WHERE signature = ? AND instruction_index = ? AND invalidated = 0",
    )
    .bind(&event.signature)
    .bind(i64::from(position.instruction_index))
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err("Failed to look up pool creation"))?;
    if replay.is_some() {
        return Ok(PoolCreatedOutcome::AlreadyIndexed);
    }

    let existing: Option<(String, i64)> = sqlx::query_as(
        "SELECT signature, slot FROM pool_creations WHERE pool = ? AND invalidated = 0",
    )
    .bind(&event.pool)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err("Failed to look up pool"))?;

    if let Some((existing_signature, existing_slot)) = existing {
        let detail = format!(
            "pool {} already created at slot {existing_slot} by {existing_signature}",
            event.pool
        );
        warn!(
            error = %IndexerError::consistency(&detail),
            duplicate_signature = %event.signature,
            duplicate_slot = position.slot,
            "Duplicate pool creation rejected"
        );

        sqlx::query(
            "INSERT INTO consistency_violations
                (kind, pool, signature, instruction_index, existing_signature, slot, detail, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(DUPLICATE_POOL_CREATION)
        .bind(&event.pool)
        .bind(&event.signature)
        .bind(i64::from(position.instruction_index))
        .bind(&existing_signature)
        .bind(slot_to_db(position.slot))
        .bind(&detail)
        .bind(now_timestamp())
        .execute(&mut *conn)
        .await
        .map_err(db_err("Failed to record consistency violation"))?;

        return Ok(PoolCreatedOutcome::Duplicate {
            existing_signature,
            existing_slot: crate::db::slot_from_db(existing_slot),
        });
    }

    let mints = serde_json::to_string(&event.mints)
        .map_err(|e| IndexerError::database("Failed to encode mints", Some(Box::new(e))))?;

    sqlx::query(
        "INSERT INTO pool_creations
            (pool, program_id, mints, creator, signature, slot, tx_index, instruction_index, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.pool)
    .bind(&event.program_id)
    .bind(mints)
    .bind(&event.creator)
    .bind(&event.signature)
    .bind(slot_to_db(position.slot))
    .bind(i64::from(position.tx_index))
    .bind(i64::from(position.instruction_index))
    .bind(now_timestamp())
    .execute(&mut *conn)
    .await
    .map_err(db_err("Failed to insert pool creation"))?;

    let promoted_swaps = sqlx::query(
        "UPDATE swaps SET status = 'attached'
         WHERE pool = ? AND status = 'pending' AND invalidated = 0",
    )
    .bind(&event.pool)
    .execute(&mut *conn)
    .await
    .map_err(db_err("Failed to attach pending swaps"))?
    .rows_affected();

    info!(
        pool = %event.pool,
        slot = position.slot,
        signature = %event.signature,
        promoted_swaps,
        "Pool created"
    );

    Ok(PoolCreatedOutcome::Inserted { promoted_swaps })
}

async fn record_swap(
    conn: &mut SqliteConnection,
    event: &SwapExecuted,
    options: IndexOptions,
) -> IndexerResult<SwapOutcome> {
    let position = event.position;

    let replay: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM swaps WHERE signature = ? AND instruction_index = ? AND invalidated = 0",
    )
    .bind(&event.signature)
    .bind(i64::from(position.instruction_index))
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err("Failed to look up swap"))?;
    if replay.is_some() {
        return Ok(SwapOutcome::DuplicateSignature);
    }

    let Some(pool) = event.pool.as_deref() else {
        warn!(signature = %event.signature, slot = position.slot, "Swap without pool id recorded as orphan");
        insert_swap(
            conn,
            event,
            SwapStatus::Orphan,
            Some("swap does not reference a pool"),
        )
        .await?;
        return Ok(SwapOutcome::UnknownPool);
    };

    let known: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM pool_creations WHERE pool = ? AND invalidated = 0")
            .bind(pool)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err("Failed to look up pool"))?;

    if known.is_some() {
        insert_swap(conn, event, SwapStatus::Attached, None).await?;
        return Ok(SwapOutcome::Inserted);
    }

    debug!(pool, signature = %event.signature, slot = position.slot, "Swap for unknown pool held as pending");
    insert_swap(conn, event, SwapStatus::Pending, None).await?;
    evict_over_capacity(conn, position.slot, options.pending_capacity).await?;
    Ok(SwapOutcome::UnknownPool)
}

async fn insert_swap(
    conn: &mut SqliteConnection,
    event: &SwapExecuted,
    status: SwapStatus,
    orphan_reason: Option<&str>,
) -> IndexerResult<()> {
    let position = event.position;
    let orphaned_at = (status == SwapStatus::Orphan).then(|| slot_to_db(position.slot));

    sqlx::query(
        "INSERT INTO swaps
            (pool, program_id, input_mint, amount_in, output_mint, amount_out, trader, signature,
             slot, tx_index, instruction_index, status, orphan_reason, orphaned_at_slot, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.pool)
    .bind(&event.program_id)
    .bind(&event.input_mint)
    .bind(event.amount_in.to_string())
    .bind(&event.output_mint)
    .bind(event.amount_out.to_string())
    .bind(&event.trader)
    .bind(&event.signature)
    .bind(slot_to_db(position.slot))
    .bind(i64::from(position.tx_index))
    .bind(i64::from(position.instruction_index))
    .bind(status.as_str())
    .bind(orphan_reason)
    .bind(orphaned_at)
    .bind(now_timestamp())
    .execute(&mut *conn)
    .await
    .map_err(db_err("Failed to insert swap"))?;

    Ok(())
}

async fn record_anomaly(conn: &mut SqliteConnection, marker: &Unrecognized) -> IndexerResult<bool> {
    let EventPosition {
        slot,
        tx_index,
        instruction_index,
    } = marker.position;

    let inserted = sqlx::query(
        "INSERT INTO decode_anomalies
            (program_id, signature, slot, tx_index, instruction_index, diagnostic, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT DO NOTHING",
    )
    .bind(&marker.program_id)
    .bind(&marker.signature)
    .bind(slot_to_db(slot))
    .bind(i64::from(tx_index))
    .bind(i64::from(instruction_index))
    .bind(&marker.diagnostic)
    .bind(now_timestamp())
    .execute(&mut *conn)
    .await
    .map_err(db_err("Failed to record decode anomaly"))?
    .rows_affected();

    if inserted > 0 {
        debug!(
            program_id = %marker.program_id,
            signature = %marker.signature,
            instruction_index,
            diagnostic = %marker.diagnostic,
            "Unrecognized instruction"
        );
    }
    Ok(inserted > 0)
}

/// Orphan pending swaps older than the retention window as of `current_slot`.
async fn expire_pending(conn: &mut SqliteConnection, current_slot: u64, retention_slots: u64) -> IndexerResult<u64> {
    let Some(cutoff) = current_slot.checked_sub(retention_slots) else {
        return Ok(0);
    };

    let expired = sqlx::query(
        "UPDATE swaps SET status = 'orphan', orphan_reason = ?, orphaned_at_slot = ?
         WHERE status = 'pending' AND invalidated = 0 AND slot < ?",
    )
    .bind(format!("pool creation not seen within {retention_slots} slots"))
    .bind(slot_to_db(current_slot))
    .bind(slot_to_db(cutoff))
    .execute(&mut *conn)
    .await
    .map_err(db_err("Failed to expire pending swaps"))?
    .rows_affected();

    if expired > 0 {
        warn!(current_slot, expired, retention_slots, "Pending swaps expired into orphan list");
    }
    Ok(expired)
}

/// Orphan the oldest pending swaps beyond `capacity`.
async fn evict_over_capacity(conn: &mut SqliteConnection, current_slot: u64, capacity: u64) -> IndexerResult<()> {
    let (pending,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM swaps WHERE status = 'pending' AND invalidated = 0")
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err("Failed to count pending swaps"))?;

    #[allow(clippy::cast_possible_wrap)]
    let excess = pending - capacity as i64;
    if excess <= 0 {
        return Ok(());
    }

    sqlx::query(
        "UPDATE swaps SET status = 'orphan', orphan_reason = ?, orphaned_at_slot = ?
         WHERE id IN (
            SELECT id FROM swaps WHERE status = 'pending' AND invalidated = 0
            ORDER BY slot, tx_index, instruction_index LIMIT ?
         )",
    )
    .bind(format!("pending buffer full ({capacity} swaps)"))
    .bind(slot_to_db(current_slot))
    .bind(excess)
    .execute(&mut *conn)
    .await
    .map_err(db_err("Failed to evict pending swaps"))?;

    warn!(evicted = excess, capacity, "Pending buffer over capacity, oldest swaps orphaned");
    Ok(())
}
