//! Block scanner: an ordered, lazily fetched stream of per-slot batches.
//!
//! Up to `prefetch_window` block fetches run concurrently, but batches are
//! yielded strictly in slot order, so the caller can decode and index one
//! slot at a time while RPC latency is hidden.
//!
//! ```text
//! slots:    100   101   102   103   104
//! fetch:    [====][==][=====][=][===]     (window = 4, concurrent)
//! yield:    100 → 101 → 102 → 103 → 104   (in order)
//! ```
//!
//! The scanner has no side effects. Skipped slots are yielded as
//! [`SlotOutcome::Skipped`] and blocks the client could not convert as
//! [`SlotOutcome::Unreadable`], so the caller records both as gaps; transient
//! failures are retried with [`Backoff`] and then yielded as errors.

pub mod filter;
pub mod locate;

use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::debug;

use crate::error::IndexerResult;
use crate::rpc::{Backoff, BlockFetch, ChainClient, Commitment, Transaction};

pub use filter::TransactionFilter;
pub use locate::slot_at_time;

/// Scanner tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Commitment level for `getBlock`
    pub commitment: Commitment,
    /// Maximum number of concurrent block fetches
    pub prefetch_window: usize,
    /// Retry policy per block fetch
    pub backoff: Backoff,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            commitment: Commitment::Confirmed,
            prefetch_window: 4,
            backoff: Backoff::default(),
        }
    }
}

/// What the scanner found at one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// A block exists; `candidates` are the transactions passing the filter
    Block {
        /// Hash of the block
        blockhash: String,
        /// Hash of its parent
        previous_blockhash: String,
        /// Slot of its parent
        parent_slot: u64,
        /// Matching successful transactions in block order
        candidates: Vec<Transaction>,
    },
    /// No block at this slot
    Skipped {
        /// Provider explanation
        reason: String,
    },
    /// A block exists but the client could not convert it
    Unreadable {
        /// Conversion error
        reason: String,
    },
}

/// One slot worth of scanner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBatch {
    /// Slot scanned
    pub slot: u64,
    /// Result for the slot
    pub outcome: SlotOutcome,
}

/// Produces [`SlotBatch`] streams over slot ranges.
#[derive(Clone)]
pub struct BlockScanner {
    client: Arc<dyn ChainClient>,
    options: ScanOptions,
}

impl BlockScanner {
    /// Create a scanner over `client`.
    #[must_use]
    pub fn new(client: Arc<dyn ChainClient>, options: ScanOptions) -> Self {
        Self { client, options }
    }

    /// Scanner options.
    #[must_use]
    pub const fn options(&self) -> ScanOptions {
        self.options
    }

    /// Lazily scan `from..=to`. Nothing is fetched until the stream is polled,
    /// and dropping the stream cancels in-flight fetches. An empty range
    /// (`from > to`) yields nothing.
    #[must_use]
    pub fn scan(
        &self,
        from: u64,
        to: u64,
        filter: TransactionFilter,
    ) -> BoxStream<'static, IndexerResult<SlotBatch>> {
        let client = Arc::clone(&self.client);
        let filter = Arc::new(filter);
        let options = self.options;

        stream::iter(from..=to)
            .map(move |slot| {
                let client = Arc::clone(&client);
                let filter = Arc::clone(&filter);
                async move { fetch_slot(client.as_ref(), slot, &filter, options).await }
            })
            .buffered(options.prefetch_window.max(1))
            .boxed()
    }
}

async fn fetch_slot(
    client: &dyn ChainClient,
    slot: u64,
    filter: &TransactionFilter,
    options: ScanOptions,
) -> IndexerResult<SlotBatch> {
    let fetched = match options
        .backoff
        .retry("getBlock", || client.get_block(slot, options.commitment))
        .await
    {
        Ok(fetched) => fetched,
        Err(e) if e.is_transient() || e.is_fatal() => return Err(e),
        // Recorded as a gap, not retried forever
        Err(e) => {
            return Ok(SlotBatch {
                slot,
                outcome: SlotOutcome::Unreadable {
                    reason: format!("block unreadable: {e}"),
                },
            })
        }
    };

    let outcome = match fetched {
        BlockFetch::Found(block) => {
            let total = block.transactions.len();
            let candidates: Vec<Transaction> = block
                .transactions
                .into_iter()
                .filter(|tx| filter.matches(tx))
                .collect();
            debug!(slot, total, candidates = candidates.len(), "Block filtered");
            SlotOutcome::Block {
                blockhash: block.blockhash,
                previous_blockhash: block.previous_blockhash,
                parent_slot: block.parent_slot,
                candidates,
            }
        }
        BlockFetch::NotFound { reason } => SlotOutcome::Skipped { reason },
    };

    Ok(SlotBatch { slot, outcome })
}
