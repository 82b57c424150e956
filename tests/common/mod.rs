//! Shared fixtures: an in-memory chain and a text-script decoder.
//!
//! Stub instructions carry their meaning as plain text in `data`:
//!
//! - `create:<pool>` creates a pool
//! - `swap:<pool>:<amount>` swaps `amount` against a pool
//! - anything else decodes to an `Unrecognized` marker

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use async_trait::async_trait;
use solana_pool_indexer::{
    config::ScanConfig,
    coordinator::{JobReport, ScanJob},
    cursor::{CursorStore, JobKey},
    db::create_pool,
    decoder::{position_of, unrecognized, DecoderRegistry, EventDecoder},
    error::{IndexerError, IndexerResult},
    events::{DomainEvent, PoolCreated, SwapExecuted},
    index::{IndexOptions, PoolIndex},
    rpc::{Backoff, Block, BlockFetch, ChainClient, Commitment, Instruction, Transaction},
    scanner::TransactionFilter,
};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Program handled by [`StubDecoder`].
pub const STUB_PROGRAM: &str = "StubDex1111111111111111111111111111111111111";

pub const MINT_A: &str = "MintA";
pub const MINT_B: &str = "MintB";

/// Block time of slot 0; every later slot is one second later.
pub const GENESIS_TIME: i64 = 1_700_000_000;

pub fn block_time_of(slot: u64) -> i64 {
    GENESIS_TIME + i64::try_from(slot).unwrap()
}

/// Decoder for the text-scripted stub program.
pub struct StubDecoder;

impl EventDecoder for StubDecoder {
    fn program_id(&self) -> &str {
        STUB_PROGRAM
    }

    fn decode(&self, transaction: &Transaction) -> Vec<DomainEvent> {
        transaction
            .instructions
            .iter()
            .filter(|ix| transaction.program_id(ix) == Some(STUB_PROGRAM))
            .map(|ix| decode_script(transaction, ix))
            .collect()
    }
}

fn decode_script(transaction: &Transaction, ix: &Instruction) -> DomainEvent {
    let parts: Vec<&str> = ix.data.split(':').collect();
    let position = position_of(transaction, ix);
    match parts.as_slice() {
        ["create", pool] => DomainEvent::PoolCreated(PoolCreated {
            pool: (*pool).to_string(),
            mints: vec![MINT_A.to_string(), MINT_B.to_string()],
            program_id: STUB_PROGRAM.to_string(),
            creator: Some("Creator".to_string()),
            signature: transaction.signature.clone(),
            position,
        }),
        ["swap", pool, amount] => match amount.parse::<u64>() {
            Ok(amount) => DomainEvent::SwapExecuted(SwapExecuted {
                pool: Some((*pool).to_string()),
                program_id: STUB_PROGRAM.to_string(),
                input_mint: Some(MINT_A.to_string()),
                amount_in: amount,
                output_mint: Some(MINT_B.to_string()),
                amount_out: amount * 2,
                trader: "Trader".to_string(),
                signature: transaction.signature.clone(),
                position,
            }),
            Err(_) => unrecognized(transaction, ix, STUB_PROGRAM, "bad amount"),
        },
        _ => unrecognized(transaction, ix, STUB_PROGRAM, format!("unknown script {:?}", ix.data)),
    }
}

/// Transaction invoking the stub program once per script.
pub fn stub_tx(signature: &str, scripts: &[&str]) -> Transaction {
    Transaction {
        signature: signature.to_string(),
        account_keys: vec!["Payer".to_string(), STUB_PROGRAM.to_string()],
        instructions: scripts
            .iter()
            .enumerate()
            .map(|(i, script)| Instruction {
                index: u32::try_from(i).unwrap(),
                outer_index: u32::try_from(i).unwrap(),
                program_id_index: 1,
                data: (*script).to_string(),
                ..Instruction::default()
            })
            .collect(),
        ..Transaction::default()
    }
}

pub fn create_tx(signature: &str, pool: &str) -> Transaction {
    stub_tx(signature, &[format!("create:{pool}").as_str()])
}

pub fn swap_tx(signature: &str, pool: &str, amount: u64) -> Transaction {
    stub_tx(signature, &[format!("swap:{pool}:{amount}").as_str()])
}

/// Add read-only accounts after the stub program.
pub fn touching(mut tx: Transaction, accounts: &[&str]) -> Transaction {
    tx.account_keys.extend(accounts.iter().map(|a| (*a).to_string()));
    tx
}

#[derive(Debug, Clone)]
struct FakeBlock {
    parent_slot: Option<u64>,
    fork: String,
    transactions: Vec<Transaction>,
}

#[derive(Debug, Default)]
struct ChainState {
    blocks: BTreeMap<u64, FakeBlock>,
    tip: u64,
    finalized: u64,
    transient_failures: HashMap<u64, u32>,
    always_transient: HashSet<u64>,
    unauthorized: bool,
    fetches: Vec<u64>,
    time_lookups: usize,
}

/// Scripted chain implementing [`ChainClient`].
///
/// Block hashes are `<fork>-<slot>`; a block's parent is the closest earlier
/// slot holding a block.
#[derive(Debug, Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a block on the main fork and move the tip to it if higher.
    pub fn push_block(&self, slot: u64, transactions: Vec<Transaction>) {
        let mut state = self.state.lock().unwrap();
        let transactions = transactions
            .into_iter()
            .enumerate()
            .map(|(i, mut tx)| {
                tx.slot = slot;
                tx.index = u32::try_from(i).unwrap();
                tx
            })
            .collect();
        state.blocks.insert(
            slot,
            FakeBlock {
                parent_slot: None,
                fork: "main".to_string(),
                transactions,
            },
        );
        state.tip = state.tip.max(slot);
        relink(&mut state);
    }

    /// Replace every block at `from_slot` or later with the given ones,
    /// hashed on a new fork.
    pub fn reorg_from(&self, from_slot: u64, fork: &str, blocks: Vec<(u64, Vec<Transaction>)>) {
        {
            let mut state = self.state.lock().unwrap();
            state.blocks.retain(|slot, _| *slot < from_slot);
        }
        for (slot, transactions) in blocks {
            self.push_block(slot, transactions);
            let mut state = self.state.lock().unwrap();
            if let Some(block) = state.blocks.get_mut(&slot) {
                block.fork = fork.to_string();
            }
        }
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    pub fn set_finalized(&self, slot: u64) {
        self.state.lock().unwrap().finalized = slot;
    }

    /// Fail the next `times` fetches of `slot` with a transient error.
    pub fn fail_times(&self, slot: u64, times: u32) {
        self.state.lock().unwrap().transient_failures.insert(slot, times);
    }

    /// Fail every fetch of `slot` with a transient error.
    pub fn fail_always(&self, slot: u64) {
        self.state.lock().unwrap().always_transient.insert(slot);
    }

    /// Reject every call as unauthorized.
    pub fn revoke_access(&self) {
        self.state.lock().unwrap().unauthorized = true;
    }

    /// Slots passed to `get_block`, in call order.
    pub fn fetches(&self) -> Vec<u64> {
        self.state.lock().unwrap().fetches.clone()
    }

    /// Number of `get_block_time` calls.
    pub fn time_lookups(&self) -> usize {
        self.state.lock().unwrap().time_lookups
    }
}

fn relink(state: &mut ChainState) {
    let slots: Vec<u64> = state.blocks.keys().copied().collect();
    for (i, slot) in slots.iter().enumerate() {
        let parent = i.checked_sub(1).map(|p| slots[p]);
        if let Some(block) = state.blocks.get_mut(slot) {
            block.parent_slot = parent;
        }
    }
}

fn hash_of(state: &ChainState, slot: u64) -> String {
    state
        .blocks
        .get(&slot)
        .map_or_else(|| "genesis".to_string(), |b| format!("{}-{slot}", b.fork))
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn get_block(&self, slot: u64, _commitment: Commitment) -> IndexerResult<BlockFetch> {
        let mut state = self.state.lock().unwrap();
        state.fetches.push(slot);
        if state.unauthorized {
            return Err(IndexerError::authentication("HTTP 401 Unauthorized"));
        }
        if state.always_transient.contains(&slot) {
            return Err(IndexerError::transient(format!("node behind at slot {slot}"), None));
        }
        if let Some(remaining) = state.transient_failures.get_mut(&slot) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(IndexerError::transient("HTTP 429 Too Many Requests", None));
            }
        }

        let Some(block) = state.blocks.get(&slot).cloned() else {
            return Ok(BlockFetch::NotFound {
                reason: format!("Slot {slot} was skipped, or missing due to ledger jump to recent snapshot"),
            });
        };
        let parent_slot = block.parent_slot.unwrap_or_else(|| slot.saturating_sub(1));
        Ok(BlockFetch::Found(Block {
            slot,
            blockhash: hash_of(&state, slot),
            previous_blockhash: hash_of(&state, parent_slot),
            parent_slot,
            block_time: Some(block_time_of(slot)),
            transactions: block.transactions,
        }))
    }

    async fn get_transaction(&self, signature: &str, _commitment: Commitment) -> IndexerResult<Option<Transaction>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .blocks
            .values()
            .flat_map(|b| b.transactions.iter())
            .find(|tx| tx.signature == signature)
            .cloned())
    }

    async fn get_slot(&self, commitment: Commitment) -> IndexerResult<u64> {
        let state = self.state.lock().unwrap();
        if state.unauthorized {
            return Err(IndexerError::authentication("HTTP 401 Unauthorized"));
        }
        Ok(match commitment {
            Commitment::Finalized => state.finalized,
            Commitment::Processed | Commitment::Confirmed => state.tip,
        })
    }

    async fn get_block_time(&self, slot: u64) -> IndexerResult<Option<i64>> {
        let mut state = self.state.lock().unwrap();
        state.time_lookups += 1;
        if state.unauthorized {
            return Err(IndexerError::authentication("HTTP 401 Unauthorized"));
        }
        Ok(state.blocks.contains_key(&slot).then(|| block_time_of(slot)))
    }
}

/// Database-backed stores sharing one in-memory pool.
pub struct Harness {
    pub db: SqlitePool,
    pub chain: Arc<FakeChain>,
    pub options: IndexOptions,
}

impl Harness {
    pub async fn new(chain: Arc<FakeChain>) -> Self {
        Self::with_options(chain, IndexOptions::default()).await
    }

    pub async fn with_options(chain: Arc<FakeChain>, options: IndexOptions) -> Self {
        Self {
            db: create_pool("sqlite::memory:").await.expect("in-memory database"),
            chain,
            options,
        }
    }

    /// Stores on a database file, reopened by each call.
    pub async fn on_disk(chain: Arc<FakeChain>, url: &str) -> Self {
        Self {
            db: create_pool(url).await.expect("database file"),
            chain,
            options: IndexOptions::default(),
        }
    }

    pub fn index(&self) -> PoolIndex {
        PoolIndex::new(self.db.clone(), self.options)
    }

    pub fn cursors(&self) -> CursorStore {
        CursorStore::new(self.db.clone())
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(&filter(), Commitment::Confirmed)
    }

    pub async fn cursor(&self) -> Option<u64> {
        self.cursors()
            .load(&self.job_key())
            .await
            .expect("cursor readable")
            .map(|c| c.last_slot)
    }

    pub fn job(&self, config: ScanConfig) -> ScanJob {
        let mut decoders = DecoderRegistry::new();
        decoders.register(Arc::new(StubDecoder));
        ScanJob::new(
            Arc::clone(&self.chain) as Arc<dyn ChainClient>,
            decoders,
            self.cursors(),
            self.index(),
            config,
        )
    }

    /// Run a job to completion with a stop signal that never fires.
    pub async fn run(&self, config: ScanConfig) -> JobReport {
        let (_stop, stop_rx) = watch::channel(false);
        self.job(config).run(stop_rx).await
    }
}

pub fn filter() -> TransactionFilter {
    TransactionFilter::for_programs([STUB_PROGRAM])
}

/// Job settings with millisecond backoff.
pub fn scan_config(from: Option<u64>, to: Option<u64>) -> ScanConfig {
    let mut config = ScanConfig::new(filter(), Commitment::Confirmed).with_range(from, to);
    config.options.backoff = Backoff::new(2, Duration::from_millis(1), Duration::from_millis(5));
    config.options.prefetch_window = 3;
    config.max_consecutive_failures = 3;
    config.poll_interval = Duration::from_millis(10);
    config
}
