//! Chain data model handed from the RPC layer to the scanner and decoders.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IndexerError;

/// Confidence tier at which a block is read.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    /// Seen by the connected node, may still be dropped
    Processed,
    /// Voted on by a supermajority; used for scanning throughput
    #[default]
    Confirmed,
    /// Rooted; used to resolve reorgs
    Finalized,
}

impl Commitment {
    /// JSON-RPC name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(IndexerError::config(
                format!("unknown commitment level '{other}' (expected processed, confirmed or finalized)"),
                None,
            )),
        }
    }
}

/// A confirmed block with its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Slot the block was produced in
    pub slot: u64,
    /// Base58 block hash
    pub blockhash: String,
    /// Hash of the parent block
    pub previous_blockhash: String,
    /// Slot of the parent block (earlier slots may have been skipped)
    pub parent_slot: u64,
    /// Estimated production time (unix seconds)
    pub block_time: Option<i64>,
    /// Transactions in block order
    pub transactions: Vec<Transaction>,
}

/// A transaction as seen by the decoders.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    /// First signature (the transaction id)
    pub signature: String,
    /// Slot containing the transaction
    pub slot: u64,
    /// Index inside the block
    pub index: u32,
    /// Static account keys followed by addresses loaded from lookup tables
    pub account_keys: Vec<String>,
    /// Program log output
    pub log_messages: Vec<String>,
    /// Top-level instructions with their inner instructions, flattened
    pub instructions: Vec<Instruction>,
    /// Token balances before and after execution
    pub token_balances: Vec<TokenBalanceChange>,
    /// Whether execution failed (`meta.err` set)
    pub failed: bool,
}

impl Transaction {
    /// Program id of an instruction.
    #[must_use]
    pub fn program_id(&self, instruction: &Instruction) -> Option<&str> {
        self.account_keys
            .get(instruction.program_id_index)
            .map(String::as_str)
    }

    /// Resolve the n-th account of an instruction to its key.
    #[must_use]
    pub fn instruction_account(&self, instruction: &Instruction, n: usize) -> Option<&str> {
        instruction
            .accounts
            .get(n)
            .and_then(|idx| self.account_keys.get(*idx))
            .map(String::as_str)
    }

    /// Token balance snapshot for an account key index.
    #[must_use]
    pub fn token_balance(&self, account_index: usize) -> Option<&TokenBalanceChange> {
        self.token_balances
            .iter()
            .find(|b| b.account_index == account_index)
    }

    /// Whether any account key equals `key`.
    #[must_use]
    pub fn mentions(&self, key: &str) -> bool {
        self.account_keys.iter().any(|k| k == key)
    }
}

/// One instruction, top-level or inner.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instruction {
    /// Flattened position inside the transaction
    pub index: u32,
    /// Index of the top-level instruction this belongs to
    pub outer_index: u32,
    /// `true` for instructions invoked through CPI
    pub inner: bool,
    /// Index into `account_keys` of the invoked program
    pub program_id_index: usize,
    /// Indices into `account_keys`
    pub accounts: Vec<usize>,
    /// Base58-encoded instruction data
    pub data: String,
}

impl Instruction {
    /// Decode the base58 instruction data.
    ///
    /// # Errors
    ///
    /// Returns a decode anomaly when the data is not valid base58.
    pub fn data_bytes(&self) -> Result<Vec<u8>, IndexerError> {
        bs58::decode(&self.data)
            .into_vec()
            .map_err(|e| IndexerError::decode_anomaly(format!("invalid base58 data: {e}")))
    }
}

/// Pre/post token balance of one token account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenBalanceChange {
    /// Index into `account_keys`
    pub account_index: usize,
    /// Token mint
    pub mint: String,
    /// Owner wallet of the token account
    pub owner: Option<String>,
    /// Raw amount before execution
    pub pre: u64,
    /// Raw amount after execution
    pub post: u64,
}

impl TokenBalanceChange {
    /// Amount that left the account.
    #[must_use]
    pub const fn decrease(&self) -> u64 {
        self.pre.saturating_sub(self.post)
    }

    /// Amount that entered the account.
    #[must_use]
    pub const fn increase(&self) -> u64 {
        self.post.saturating_sub(self.pre)
    }
}
