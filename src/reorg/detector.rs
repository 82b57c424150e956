//! Reorg detection against the stored slot-hash history.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cursor::{CursorStore, JobKey};
use crate::error::{IndexerError, IndexerResult};

/// Linkage data of a fetched block.
///
/// Stores the minimum needed to verify chain continuity:
/// - the block's own slot and hash
/// - the parent slot and hash it claims to extend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Slot of the block
    pub slot: u64,
    /// Block hash
    pub blockhash: String,
    /// Parent block hash
    pub previous_blockhash: String,
    /// Parent slot
    pub parent_slot: u64,
}

impl BlockRecord {
    /// Create a record.
    #[must_use]
    pub fn new(
        slot: u64,
        blockhash: impl Into<String>,
        previous_blockhash: impl Into<String>,
        parent_slot: u64,
    ) -> Self {
        Self {
            slot,
            blockhash: blockhash.into(),
            previous_blockhash: previous_blockhash.into(),
            parent_slot,
        }
    }
}

/// A detected divergence between the stored history and the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReorgSignal {
    /// Earliest slot whose stored content is no longer canonical
    pub divergent_slot: u64,
    /// Hash recorded when the slot was indexed
    pub expected: String,
    /// Hash now reported by the chain
    pub found: String,
}

impl ReorgSignal {
    /// Error form, for logging and audit reasons.
    #[must_use]
    pub fn to_error(&self) -> IndexerError {
        IndexerError::reorg(self.divergent_slot, &self.expected, &self.found)
    }
}

/// What the hash history holds around a fetched block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StoredLinkage {
    /// Hash stored for the parent slot
    parent: Option<String>,
    /// Parent slot was recorded as skipped
    parent_skipped: bool,
    /// Latest hashed slot strictly between the parent and the block
    between: Option<(u64, String)>,
    /// Hash stored for the block's own slot
    own: Option<String>,
}

/// Chain reorganization detector.
///
/// ## Algorithm
///
/// For every fetched block:
///
/// 1. If its parent slot was indexed, the stored parent hash must equal the
///    block's `previous_blockhash` (the parent was replaced)
/// 2. If its parent slot was recorded as skipped, the skip was wrong (the
///    slot has a block on the canonical chain now)
/// 3. No slot between the parent and the block may hold a stored hash: the
///    block builds on an older ancestor, so those blocks were abandoned
/// 4. If its own slot was indexed before, the stored hash must equal the
///    fetched hash (a re-scanned slot that changed content)
///
/// A mismatch yields a [`ReorgSignal`] at the earliest divergent slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorgDetector {
    /// Total number of reorgs detected
    reorg_count: u64,
}

impl ReorgDetector {
    /// Create a detector.
    #[must_use]
    pub const fn new() -> Self {
        Self { reorg_count: 0 }
    }

    /// Get the total number of detected reorgs.
    #[must_use]
    pub const fn reorg_count(&self) -> u64 {
        self.reorg_count
    }

    /// Check `block` against the hash history of `job`.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the hash history cannot be read.
    pub async fn check(
        &mut self,
        store: &CursorStore,
        job: &JobKey,
        block: &BlockRecord,
    ) -> IndexerResult<Option<ReorgSignal>> {
        let mut stored = StoredLinkage {
            own: store.blockhash_at(job, block.slot).await?,
            ..StoredLinkage::default()
        };
        if block.parent_slot < block.slot {
            stored.parent = store.blockhash_at(job, block.parent_slot).await?;
            stored.parent_skipped = store.is_skipped(job, block.parent_slot).await?;
            stored.between = store
                .latest_hashed_slot_below(job, block.slot)
                .await?
                .filter(|(slot, _)| *slot > block.parent_slot);
        }

        let signal = detect(block, &stored);
        if let Some(signal) = &signal {
            self.reorg_count += 1;
            warn!(
                slot = block.slot,
                divergent_slot = signal.divergent_slot,
                expected = %signal.expected,
                found = %signal.found,
                reorg_count = self.reorg_count,
                "REORG DETECTED"
            );
        } else {
            debug!(slot = block.slot, parent_slot = block.parent_slot, "Chain linkage verified");
        }
        Ok(signal)
    }

    /// Slot to roll the cursor back to: the last finalized slot, and never at
    /// or beyond the divergent slot.
    #[must_use]
    pub fn rollback_target(divergent_slot: u64, finalized_slot: u64) -> u64 {
        finalized_slot.min(divergent_slot.saturating_sub(1))
    }
}

/// Pure linkage check. Checks run in slot order so the earliest divergence
/// is reported.
fn detect(block: &BlockRecord, stored: &StoredLinkage) -> Option<ReorgSignal> {
    if let Some(expected) = &stored.parent {
        if *expected != block.previous_blockhash {
            return Some(ReorgSignal {
                divergent_slot: block.parent_slot,
                expected: expected.clone(),
                found: block.previous_blockhash.clone(),
            });
        }
    }

    if stored.parent_skipped {
        return Some(ReorgSignal {
            divergent_slot: block.parent_slot,
            expected: format!("slot {} skipped", block.parent_slot),
            found: block.previous_blockhash.clone(),
        });
    }

    if let Some((abandoned_slot, expected)) = &stored.between {
        return Some(ReorgSignal {
            divergent_slot: block.parent_slot + 1,
            expected: expected.clone(),
            found: format!("slot {abandoned_slot} abandoned, block {} builds on slot {}", block.slot, block.parent_slot),
        });
    }

    if let Some(expected) = &stored.own {
        if *expected != block.blockhash {
            return Some(ReorgSignal {
                divergent_slot: block.slot,
                expected: expected.clone(),
                found: block.blockhash.clone(),
            });
        }
    }

    None
}
