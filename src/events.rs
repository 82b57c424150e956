//! Typed domain events produced by the decoders.
//!
//! A decoded transaction yields zero or more [`DomainEvent`]s. Every event
//! carries an [`EventPosition`] so the index can order swaps by
//! `(slot, tx index, instruction index)` regardless of arrival order, and a
//! signature + instruction index pair that makes re-indexing idempotent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an instruction in the ledger.
///
/// Derived `Ord` compares lexicographically: slot, then transaction index
/// within the block, then flattened instruction index within the transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    /// Slot containing the transaction
    pub slot: u64,
    /// Index of the transaction inside the block
    pub tx_index: u32,
    /// Flattened instruction index (inner instructions follow their parent)
    pub instruction_index: u32,
}

impl EventPosition {
    /// Create a new position.
    #[must_use]
    pub const fn new(slot: u64, tx_index: u32, instruction_index: u32) -> Self {
        Self {
            slot,
            tx_index,
            instruction_index,
        }
    }
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.slot, self.tx_index, self.instruction_index
        )
    }
}

/// A liquidity pool was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCreated {
    /// On-chain pool account
    pub pool: String,
    /// Asset mints traded by the pool (at least two)
    pub mints: Vec<String>,
    /// Program that created the pool
    pub program_id: String,
    /// Account that paid for the creation, when known
    pub creator: Option<String>,
    /// Originating transaction signature
    pub signature: String,
    /// Ledger position
    pub position: EventPosition,
}

/// A swap was executed against a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapExecuted {
    /// Pool traded against; `None` when the decoder could not tell
    pub pool: Option<String>,
    /// Program that executed the swap
    pub program_id: String,
    /// Mint of the asset sold
    pub input_mint: Option<String>,
    /// Raw amount sold
    pub amount_in: u64,
    /// Mint of the asset bought
    pub output_mint: Option<String>,
    /// Raw amount bought
    pub amount_out: u64,
    /// Wallet that signed the trade
    pub trader: String,
    /// Originating transaction signature
    pub signature: String,
    /// Ledger position
    pub position: EventPosition,
}

/// An instruction of a registered program that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unrecognized {
    /// Program owning the instruction
    pub program_id: String,
    /// Originating transaction signature
    pub signature: String,
    /// Ledger position of the raw instruction
    pub position: EventPosition,
    /// Why decoding failed
    pub diagnostic: String,
}

/// Tagged decode result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Pool creation
    PoolCreated(PoolCreated),
    /// Swap execution
    SwapExecuted(SwapExecuted),
    /// Undecodable instruction
    Unrecognized(Unrecognized),
}

impl DomainEvent {
    /// Ledger position of the event.
    #[must_use]
    pub const fn position(&self) -> EventPosition {
        match self {
            Self::PoolCreated(e) => e.position,
            Self::SwapExecuted(e) => e.position,
            Self::Unrecognized(e) => e.position,
        }
    }

    /// Signature of the originating transaction.
    #[must_use]
    pub fn signature(&self) -> &str {
        match self {
            Self::PoolCreated(e) => &e.signature,
            Self::SwapExecuted(e) => &e.signature,
            Self::Unrecognized(e) => &e.signature,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PoolCreated(_) => "pool_created",
            Self::SwapExecuted(_) => "swap_executed",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}
