//! Chain client: the only I/O boundary to the ledger.
//!
//! The scanner and coordinator depend on the [`ChainClient`] trait, never on a
//! concrete transport, so tests can inject an in-memory chain.
//!
//! # Provider Types
//!
//! - **HTTP JSON-RPC** ([`http`]): [`SolanaRpcClient`], rate limited with a
//!   token bucket and classifying failures into transient / not-found / fatal
//! - **Retry policy** ([`retry`]): exponential backoff with jitter applied by
//!   the scanner around every block fetch
//!
//! # Failure Classification
//!
//! ```text
//! HTTP 429, 5xx, timeout, connect error  → TransientIo (retried)
//! JSON-RPC -32004/-32005/-32014/-32603   → TransientIo (retried)
//! JSON-RPC -32007/-32009, null result    → NotFound   (recorded as gap)
//! HTTP 401/403                           → AuthenticationError (fatal)
//! ```

pub mod http;
pub mod retry;
pub mod types;
pub(crate) mod wire;

use async_trait::async_trait;

use crate::error::IndexerResult;

pub use http::SolanaRpcClient;
pub use retry::Backoff;
pub use types::{Block, Commitment, Instruction, TokenBalanceChange, Transaction};

/// Outcome of a block fetch that reached the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockFetch {
    /// The block exists at the requested commitment
    Found(Block),
    /// The provider reports the slot as skipped or unavailable
    NotFound {
        /// Provider explanation, stored in the gap list
        reason: String,
    },
}

/// Read access to the ledger.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch the block produced at `slot`.
    ///
    /// # Errors
    ///
    /// `TransientIo` for retryable failures, `AuthenticationError` or `Fatal`
    /// for failures that retrying cannot fix.
    async fn get_block(&self, slot: u64, commitment: Commitment) -> IndexerResult<BlockFetch>;

    /// Fetch a single transaction by signature.
    ///
    /// # Errors
    ///
    /// Same classification as [`ChainClient::get_block`].
    async fn get_transaction(
        &self,
        signature: &str,
        commitment: Commitment,
    ) -> IndexerResult<Option<Transaction>>;

    /// Highest slot reached at the given commitment.
    ///
    /// # Errors
    ///
    /// Same classification as [`ChainClient::get_block`].
    async fn get_slot(&self, commitment: Commitment) -> IndexerResult<u64>;

    /// Estimated production time of the block at `slot` (unix seconds),
    /// `None` if the slot has no block or no recorded time.
    ///
    /// # Errors
    ///
    /// Same classification as [`ChainClient::get_block`].
    async fn get_block_time(&self, slot: u64) -> IndexerResult<Option<i64>>;
}
