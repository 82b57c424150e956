//! Pool index records and their SQLite row mappings.
//!
//! Amounts are stored as decimal TEXT so the full `u64` range survives
//! SQLite's signed INTEGER; slots and indices are INTEGER.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::db::slot_from_db;
use crate::error::{IndexerError, IndexerResult};
use crate::events::EventPosition;

/// Lifecycle of a stored swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    /// Part of its pool's history
    Attached,
    /// Waiting for its pool's creation, inside the retention window
    Pending,
    /// Never correlated; kept for operator review
    Orphan,
}

impl SwapStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attached => "attached",
            Self::Pending => "pending",
            Self::Orphan => "orphan",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapStatus {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attached" => Ok(Self::Attached),
            "pending" => Ok(Self::Pending),
            "orphan" => Ok(Self::Orphan),
            other => Err(IndexerError::database(format!("unknown swap status '{other}'"), None)),
        }
    }
}

/// Creation record of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolRecord {
    /// Pool account
    pub pool: String,
    /// Creating program
    pub program_id: String,
    /// Asset mints
    pub mints: Vec<String>,
    /// Paying account, when known
    pub creator: Option<String>,
    /// Creation transaction
    pub signature: String,
    /// Ledger position of the creation
    pub position: EventPosition,
    /// Unix timestamp the record was written
    pub created_at: i64,
}

/// Stored swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapRecord {
    /// Pool traded against, if known
    pub pool: Option<String>,
    /// Executing program
    pub program_id: String,
    /// Mint sold
    pub input_mint: Option<String>,
    /// Raw amount sold
    pub amount_in: u64,
    /// Mint bought
    pub output_mint: Option<String>,
    /// Raw amount bought
    pub amount_out: u64,
    /// Signing wallet
    pub trader: String,
    /// Swap transaction
    pub signature: String,
    /// Ledger position
    pub position: EventPosition,
    /// Correlation status
    pub status: SwapStatus,
    /// Why the swap became an orphan
    pub orphan_reason: Option<String>,
}

/// A pool with its ordered swap history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolHistory {
    /// Creation record (first seen)
    pub creation: PoolRecord,
    /// Attached swaps ordered by (slot, tx index, instruction index)
    pub swaps: Vec<SwapRecord>,
}

/// Audit entry written by every invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Invalidation {
    /// Row id
    pub id: i64,
    /// First invalidated slot
    pub from_slot: i64,
    /// Operator-facing reason (e.g. the detected reorg)
    pub reason: String,
    /// Pool creations invalidated
    pub pools_invalidated: i64,
    /// Swaps invalidated
    pub swaps_invalidated: i64,
    /// Unix timestamp
    pub created_at: i64,
}

/// An event superseded by a reorg, retained for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct InvalidatedEvent {
    /// `pool_created` or `swap_executed`
    pub kind: String,
    /// Pool identity, if any
    pub pool: Option<String>,
    /// Source transaction
    pub signature: String,
    /// Source slot
    pub slot: i64,
    /// Transaction index in the block
    pub tx_index: i64,
    /// Instruction index in the transaction
    pub instruction_index: i64,
}

/// A logged, non-fatal consistency problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ConsistencyViolation {
    /// Violation kind (`duplicate_pool_creation`)
    pub kind: String,
    /// Pool identity
    pub pool: Option<String>,
    /// Offending transaction
    pub signature: String,
    /// Offending instruction
    pub instruction_index: i64,
    /// Transaction of the record that was kept
    pub existing_signature: Option<String>,
    /// Slot of the offending event
    pub slot: i64,
    /// Human-readable detail
    pub detail: String,
    /// Unix timestamp
    pub created_at: i64,
}

/// A recorded `Unrecognized` decode result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DecodeAnomaly {
    /// Program owning the instruction
    pub program_id: String,
    /// Transaction
    pub signature: String,
    /// Slot
    pub slot: i64,
    /// Transaction index in the block
    pub tx_index: i64,
    /// Instruction index in the transaction
    pub instruction_index: i64,
    /// Decoder diagnostic
    pub diagnostic: String,
}

/// Row counts for `status` output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct IndexStats {
    /// Live pool creations
    pub pools: i64,
    /// Live attached swaps
    pub attached_swaps: i64,
    /// Live pending swaps
    pub pending_swaps: i64,
    /// Live orphan swaps
    pub orphan_swaps: i64,
    /// Invalidated creations and swaps
    pub invalidated_events: i64,
    /// Live consistency violations
    pub violations: i64,
    /// Live decode anomalies
    pub anomalies: i64,
}

/// Raw `pool_creations` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct PoolRow {
    pub pool: String,
    pub program_id: String,
    pub mints: String,
    pub creator: Option<String>,
    pub signature: String,
    pub slot: i64,
    pub tx_index: i64,
    pub instruction_index: i64,
    pub created_at: i64,
}

impl TryFrom<PoolRow> for PoolRecord {
    type Error = IndexerError;

    fn try_from(row: PoolRow) -> IndexerResult<Self> {
        let mints: Vec<String> = serde_json::from_str(&row.mints).map_err(|e| {
            IndexerError::database(
                format!("Corrupt mints column for pool {}: {}", row.pool, row.mints),
                Some(Box::new(e)),
            )
        })?;

        Ok(Self {
            position: position(row.slot, row.tx_index, row.instruction_index),
            pool: row.pool,
            program_id: row.program_id,
            mints,
            creator: row.creator,
            signature: row.signature,
            created_at: row.created_at,
        })
    }
}

/// Raw `swaps` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SwapRow {
    pub pool: Option<String>,
    pub program_id: String,
    pub input_mint: Option<String>,
    pub amount_in: String,
    pub output_mint: Option<String>,
    pub amount_out: String,
    pub trader: String,
    pub signature: String,
    pub slot: i64,
    pub tx_index: i64,
    pub instruction_index: i64,
    pub status: String,
    pub orphan_reason: Option<String>,
}

impl TryFrom<SwapRow> for SwapRecord {
    type Error = IndexerError;

    fn try_from(row: SwapRow) -> IndexerResult<Self> {
        Ok(Self {
            amount_in: parse_amount(&row.amount_in, &row.signature)?,
            amount_out: parse_amount(&row.amount_out, &row.signature)?,
            status: row.status.parse()?,
            position: position(row.slot, row.tx_index, row.instruction_index),
            pool: row.pool,
            program_id: row.program_id,
            input_mint: row.input_mint,
            output_mint: row.output_mint,
            trader: row.trader,
            signature: row.signature,
            orphan_reason: row.orphan_reason,
        })
    }
}

/// Columns selected into [`SwapRow`].
pub(crate) const SWAP_COLUMNS: &str = "pool, program_id, input_mint, amount_in, output_mint, amount_out, trader, \
     signature, slot, tx_index, instruction_index, status, orphan_reason";

/// Columns selected into [`PoolRow`].
pub(crate) const POOL_COLUMNS: &str =
    "pool, program_id, mints, creator, signature, slot, tx_index, instruction_index, created_at";

fn parse_amount(raw: &str, signature: &str) -> IndexerResult<u64> {
    raw.parse().map_err(|e| {
        IndexerError::database(
            format!("Corrupt amount '{raw}' for swap {signature}"),
            Some(Box::new(e)),
        )
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn position(slot: i64, tx_index: i64, instruction_index: i64) -> EventPosition {
    EventPosition::new(slot_from_db(slot), tx_index as u32, instruction_index as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_row_conversion() {
        let row = SwapRow {
            pool: Some("X".into()),
            program_id: "P".into(),
            input_mint: None,
            amount_in: "18446744073709551615".into(),
            output_mint: None,
            amount_out: "5".into(),
            trader: "T".into(),
            signature: "S".into(),
            slot: 102,
            tx_index: 3,
            instruction_index: 1,
            status: "attached".into(),
            orphan_reason: None,
        };

        let record = SwapRecord::try_from(row).expect("valid row");
        assert_eq!(record.amount_in, u64::MAX);
        assert_eq!(record.position, EventPosition::new(102, 3, 1));
        assert_eq!(record.status, SwapStatus::Attached);
    }

    #[test]
    fn test_corrupt_mints_rejected() {
        let row = PoolRow {
            pool: "X".into(),
            program_id: "P".into(),
            mints: "not json".into(),
            creator: None,
            signature: "S".into(),
            slot: 1,
            tx_index: 0,
            instruction_index: 0,
            created_at: 0,
        };
        assert!(PoolRecord::try_from(row).is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [SwapStatus::Attached, SwapStatus::Pending, SwapStatus::Orphan] {
            assert_eq!(status.as_str().parse::<SwapStatus>().ok(), Some(status));
        }
        assert!("lost".parse::<SwapStatus>().is_err());
    }
}
