//! # Solana Pool Indexer
//!
//! Resumable block scanner that indexes DEX liquidity-pool creations and the
//! swaps executed against them.
//!
//! The scanner walks a slot range (or follows the chain tip), keeps the
//! transactions that touch the configured programs, decodes their
//! instructions into domain events and stores them in SQLite. Progress is
//! tracked by a durable cursor, so an interrupted scan resumes where it
//! stopped without losing or double-counting events.
//!
//! ## Features
//!
//! - **Ordered prefetch**: concurrent `getBlock` calls, strictly in-order processing
//! - **Write then advance**: a slot's events are durable before the cursor moves
//! - **Gap tracking**: skipped slots are recorded, never silently dropped
//! - **Out-of-order swaps**: swaps seen before their pool wait in a bounded
//!   pending buffer and attach when the pool appears
//! - **Reorg handling**: block-hash linkage checks, invalidation, rescan
//! - **Rate limiting and backoff** against public RPC endpoints
//!
//! ## Architecture
//!
//! 1. **RPC Layer** ([`rpc`]) - JSON-RPC chain client
//! 2. **Scanner** ([`scanner`]) - slot streams and transaction filtering
//! 3. **Decoders** ([`decoder`]) - instructions into [`events`]
//! 4. **Pool Index** ([`index`]) - pools, swaps, pending buffer, audit trail
//! 5. **Cursor Store** ([`cursor`]) - scan progress, gaps, slot hashes
//! 6. **Coordinator** ([`coordinator`]) - per-slot pipeline, reorgs ([`reorg`]) and failures
//!
//! ## Quick Start
//!
//! ### Using the CLI
//!
//! ```bash
//! # Index a range of slots
//! cargo run --release -- scan --from 250000000 --to 250000500
//!
//! # Follow the chain tip
//! cargo run --release -- scan --follow
//! ```
//!
//! ### Using as a Library
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use solana_pool_indexer::{
//!     config::Config,
//!     coordinator::ScanJob,
//!     cursor::CursorStore,
//!     db::create_pool,
//!     decoder::DecoderRegistry,
//!     index::PoolIndex,
//!     rpc::SolanaRpcClient,
//!     scanner::TransactionFilter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let db = create_pool(config.database_url()).await?;
//!     let client = SolanaRpcClient::new(
//!         config.rpc_url(),
//!         config.max_requests_per_second(),
//!         config.rpc_timeout(),
//!     )?;
//!
//!     let filter = TransactionFilter::for_programs(config.program_ids().to_vec());
//!     let scan = config
//!         .scan_config(filter, config.commitment())
//!         .with_range(Some(250_000_000), Some(250_000_100));
//!
//!     let mut job = ScanJob::new(
//!         Arc::new(client),
//!         DecoderRegistry::with_builtin(),
//!         CursorStore::new(db.clone()),
//!         PoolIndex::new(db, config.index_options()),
//!         scan,
//!     );
//!     let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//!     let report = job.run(stop_rx).await;
//!     println!("{} -> cursor {:?}", report.state, report.cursor);
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Setup
//!
//! ```text
//! SOLANA_RPC_URL=https://api.mainnet-beta.solana.com
//! DATABASE_URL=sqlite:./indexer.db
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::IndexerResult<T>`](error::IndexerResult).
//! Only fatal errors halt a scan; skipped slots, undecodable instructions and
//! duplicate pools are recorded in the database instead.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod db;
pub mod decoder;
pub mod error;
pub mod events;
pub mod index;
pub mod observability;
pub mod reorg;
pub mod rpc;
pub mod scanner;
