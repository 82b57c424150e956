//! Chain reorganization detection.
//!
//! ## How It Works
//!
//! 1. **Slot-Hash History**: the cursor store keeps each indexed slot's block
//!    hash and parent slot
//! 2. **Linkage Verification**: every fetched block's `previous_blockhash` is
//!    compared with the stored hash of its parent slot, and a re-scanned
//!    slot's hash with the stored one
//! 3. **Rollback Target**: on mismatch the job rolls back to the last
//!    finalized slot below the divergence
//!    ([`ReorgDetector::rollback_target`])
//! 4. **Invalidate and Rescan**: index events above the target are flagged
//!    invalidated and the slots re-scanned
//!
//! ## Solana Specifics
//!
//! - Slots may be skipped, so the parent of slot `n` is `parent_slot`, not `n - 1`
//! - `confirmed` blocks can, rarely, be dropped; `finalized` blocks are rooted
//!
//! ## Example
//!
//! ```rust,no_run
//! use solana_pool_indexer::cursor::{CursorStore, JobKey};
//! use solana_pool_indexer::reorg::{BlockRecord, ReorgDetector};
//!
//! # async fn example(store: &CursorStore, job: &JobKey) -> solana_pool_indexer::error::IndexerResult<()> {
//! let mut detector = ReorgDetector::new();
//! let block = BlockRecord::new(250_000_101, "hashB", "hashA", 250_000_100);
//!
//! if let Some(signal) = detector.check(store, job, &block).await? {
//!     let finalized = 250_000_080;
//!     let target = ReorgDetector::rollback_target(signal.divergent_slot, finalized);
//!     println!("Reorg at slot {}! Rolling back to {target}", signal.divergent_slot);
//! }
//! # Ok(())
//! # }
//! ```

pub mod detector;

pub use detector::{BlockRecord, ReorgDetector, ReorgSignal};
