//! JSON-RPC wire structures for `getBlock` / `getTransaction` with
//! `"encoding": "json"` and their conversion into [`Block`] / [`Transaction`].

use serde::Deserialize;
use tracing::warn;

use super::types::{Block, Instruction, TokenBalanceChange, Transaction};
use crate::error::{IndexerError, IndexerResult};

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    /// Present on success (may be `null`)
    pub result: Option<T>,
    /// Present on failure
    pub error: Option<RpcErrorObject>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    /// Error code (-32007 slot skipped, -32009 missing in long-term storage, ...)
    pub code: i64,
    /// Error message
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlock {
    pub blockhash: String,
    pub previous_blockhash: String,
    pub parent_slot: u64,
    pub block_time: Option<i64>,
    #[serde(default)]
    pub transactions: Vec<WireTransactionWithMeta>,
}

#[derive(Debug, Deserialize)]
pub struct WireTransactionWithMeta {
    pub transaction: WireTransaction,
    pub meta: Option<WireMeta>,
}

/// `getTransaction` result: a transaction with its slot.
#[derive(Debug, Deserialize)]
pub struct WireConfirmedTransaction {
    pub slot: u64,
    pub transaction: WireTransaction,
    pub meta: Option<WireMeta>,
}

#[derive(Debug, Deserialize)]
pub struct WireTransaction {
    pub signatures: Vec<String>,
    pub message: WireMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub account_keys: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<WireInstruction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireInstruction {
    pub program_id_index: usize,
    #[serde(default)]
    pub accounts: Vec<usize>,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMeta {
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub log_messages: Option<Vec<String>>,
    #[serde(default)]
    pub inner_instructions: Option<Vec<WireInnerInstructions>>,
    #[serde(default)]
    pub pre_token_balances: Option<Vec<WireTokenBalance>>,
    #[serde(default)]
    pub post_token_balances: Option<Vec<WireTokenBalance>>,
    #[serde(default)]
    pub loaded_addresses: Option<WireLoadedAddresses>,
}

#[derive(Debug, Deserialize)]
pub struct WireInnerInstructions {
    pub index: u32,
    pub instructions: Vec<WireInstruction>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireLoadedAddresses {
    #[serde(default)]
    pub writable: Vec<String>,
    #[serde(default)]
    pub readonly: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTokenBalance {
    pub account_index: usize,
    pub mint: String,
    pub owner: Option<String>,
    pub ui_token_amount: WireTokenAmount,
}

#[derive(Debug, Deserialize)]
pub struct WireTokenAmount {
    pub amount: String,
}

impl WireBlock {
    /// Convert into the chain model. A transaction that cannot be converted
    /// is dropped on its own; the rest of the block is kept with its original
    /// block indices.
    ///
    /// # Errors
    ///
    /// Returns a decode anomaly if the block holds more than `u32::MAX`
    /// transactions.
    pub fn into_block(self, slot: u64) -> IndexerResult<Block> {
        let mut transactions = Vec::with_capacity(self.transactions.len());
        for (index, tx) in self.transactions.into_iter().enumerate() {
            let index = u32::try_from(index).map_err(|_| {
                IndexerError::decode_anomaly(format!("block {slot} has too many transactions"))
            })?;
            match convert_transaction(tx.transaction, tx.meta, slot, index) {
                Ok(tx) => transactions.push(tx),
                Err(e) => warn!(slot, tx_index = index, error = %e, "Dropped unreadable transaction"),
            }
        }

        Ok(Block {
            slot,
            blockhash: self.blockhash,
            previous_blockhash: self.previous_blockhash,
            parent_slot: self.parent_slot,
            block_time: self.block_time,
            transactions,
        })
    }
}

impl WireConfirmedTransaction {
    /// Convert into the chain model. The block index is unknown and set to 0.
    ///
    /// # Errors
    ///
    /// Returns a decode anomaly if the transaction has no signature.
    pub fn into_transaction(self) -> IndexerResult<Transaction> {
        convert_transaction(self.transaction, self.meta, self.slot, 0)
    }
}

fn convert_transaction(
    transaction: WireTransaction,
    meta: Option<WireMeta>,
    slot: u64,
    index: u32,
) -> IndexerResult<Transaction> {
    let meta = meta.unwrap_or_default();
    let signature = transaction
        .signatures
        .into_iter()
        .next()
        .ok_or_else(|| IndexerError::decode_anomaly(format!("transaction {index} in slot {slot} has no signature")))?;

    let mut account_keys = transaction.message.account_keys;
    if let Some(loaded) = meta.loaded_addresses {
        account_keys.extend(loaded.writable);
        account_keys.extend(loaded.readonly);
    }

    let mut inner_by_outer = meta.inner_instructions.unwrap_or_default();
    inner_by_outer.sort_by_key(|group| group.index);

    let mut instructions = Vec::new();
    let mut flat_index = 0u32;
    for (outer, ix) in transaction.message.instructions.into_iter().enumerate() {
        let outer = u32::try_from(outer).unwrap_or(u32::MAX);
        instructions.push(Instruction {
            index: flat_index,
            outer_index: outer,
            inner: false,
            program_id_index: ix.program_id_index,
            accounts: ix.accounts,
            data: ix.data,
        });
        flat_index += 1;

        for group in inner_by_outer.iter_mut().filter(|g| g.index == outer) {
            for inner in std::mem::take(&mut group.instructions) {
                instructions.push(Instruction {
                    index: flat_index,
                    outer_index: outer,
                    inner: true,
                    program_id_index: inner.program_id_index,
                    accounts: inner.accounts,
                    data: inner.data,
                });
                flat_index += 1;
            }
        }
    }

    // Decoders fall back to instruction arguments without balances
    let token_balances = merge_token_balances(
        meta.pre_token_balances.unwrap_or_default(),
        meta.post_token_balances.unwrap_or_default(),
    )
    .unwrap_or_else(|e| {
        warn!(%signature, slot, error = %e, "Ignoring unreadable token balances");
        Vec::new()
    });

    Ok(Transaction {
        signature,
        slot,
        index,
        account_keys,
        log_messages: meta.log_messages.unwrap_or_default(),
        instructions,
        token_balances,
        failed: meta.err.is_some_and(|e| !e.is_null()),
    })
}

/// Pair pre and post balances by account index. An account missing on one
/// side had a zero balance there (created or closed during execution).
fn merge_token_balances(
    pre: Vec<WireTokenBalance>,
    post: Vec<WireTokenBalance>,
) -> IndexerResult<Vec<TokenBalanceChange>> {
    let mut merged: Vec<TokenBalanceChange> = Vec::with_capacity(post.len().max(pre.len()));

    for balance in pre {
        merged.push(TokenBalanceChange {
            account_index: balance.account_index,
            pre: parse_amount(&balance.ui_token_amount.amount)?,
            post: 0,
            mint: balance.mint,
            owner: balance.owner,
        });
    }

    for balance in post {
        let amount = parse_amount(&balance.ui_token_amount.amount)?;
        if let Some(existing) = merged
            .iter_mut()
            .find(|b| b.account_index == balance.account_index)
        {
            existing.post = amount;
        } else {
            merged.push(TokenBalanceChange {
                account_index: balance.account_index,
                pre: 0,
                post: amount,
                mint: balance.mint,
                owner: balance.owner,
            });
        }
    }

    merged.sort_by_key(|b| b.account_index);
    Ok(merged)
}

fn parse_amount(raw: &str) -> IndexerResult<u64> {
    raw.parse::<u64>()
        .map_err(|e| IndexerError::decode_anomaly(format!("invalid token amount '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_JSON: &str = r#"{
        "blockhash": "BlockHash222",
        "previousBlockhash": "BlockHash111",
        "parentSlot": 99,
        "blockTime": 1700000000,
        "transactions": [
            {
                "meta": {
                    "err": null,
                    "logMessages": ["Program log: initialize2"],
                    "innerInstructions": [
                        {"index": 0, "instructions": [{"programIdIndex": 3, "accounts": [1], "data": "3Bxs", "stackHeight": 2}]}
                    ],
                    "preTokenBalances": [
                        {"accountIndex": 1, "mint": "MintA", "owner": "Wallet", "uiTokenAmount": {"amount": "500", "decimals": 6}}
                    ],
                    "postTokenBalances": [
                        {"accountIndex": 1, "mint": "MintA", "owner": "Wallet", "uiTokenAmount": {"amount": "200", "decimals": 6}},
                        {"accountIndex": 2, "mint": "MintB", "owner": "Wallet", "uiTokenAmount": {"amount": "7", "decimals": 9}}
                    ],
                    "loadedAddresses": {"writable": ["Loaded1"], "readonly": []}
                },
                "transaction": {
                    "signatures": ["Sig1"],
                    "message": {
                        "accountKeys": ["Wallet", "TokenA", "TokenB", "Program"],
                        "instructions": [{"programIdIndex": 3, "accounts": [0, 1, 2], "data": "2"}]
                    }
                }
            },
            {
                "meta": {"err": {"InstructionError": [0, "Custom"]}},
                "transaction": {"signatures": ["Sig2"], "message": {"accountKeys": ["Wallet"], "instructions": []}}
            }
        ]
    }"#;

    #[test]
    fn test_block_conversion() {
        let wire: WireBlock = serde_json::from_str(BLOCK_JSON).expect("valid fixture");
        let block = wire.into_block(100).expect("convertible block");

        assert_eq!(block.slot, 100);
        assert_eq!(block.parent_slot, 99);
        assert_eq!(block.previous_blockhash, "BlockHash111");
        assert_eq!(block.transactions.len(), 2);

        let tx = &block.transactions[0];
        assert_eq!(tx.signature, "Sig1");
        assert_eq!(tx.index, 0);
        assert!(!tx.failed);
        assert_eq!(tx.account_keys.last().map(String::as_str), Some("Loaded1"));

        // Outer instruction followed by its inner instruction
        assert_eq!(tx.instructions.len(), 2);
        assert!(!tx.instructions[0].inner);
        assert!(tx.instructions[1].inner);
        assert_eq!(tx.instructions[1].index, 1);
        assert_eq!(tx.instructions[1].outer_index, 0);

        let a = tx.token_balance(1).expect("balance for account 1");
        assert_eq!((a.pre, a.post), (500, 200));
        let b = tx.token_balance(2).expect("balance for account 2");
        assert_eq!((b.pre, b.post), (0, 7));

        assert!(block.transactions[1].failed);
        assert_eq!(block.transactions[1].index, 1);
    }

    const MIXED_BLOCK_JSON: &str = r#"{
        "blockhash": "BlockHash333",
        "previousBlockhash": "BlockHash222",
        "parentSlot": 100,
        "blockTime": null,
        "transactions": [
            {
                "meta": {"err": null},
                "transaction": {"signatures": [], "message": {"accountKeys": ["Wallet"], "instructions": []}}
            },
            {
                "meta": {
                    "err": null,
                    "preTokenBalances": [
                        {"accountIndex": 1, "mint": "MintA", "owner": "Wallet", "uiTokenAmount": {"amount": "-5", "decimals": 6}}
                    ],
                    "postTokenBalances": []
                },
                "transaction": {
                    "signatures": ["BadAmount"],
                    "message": {
                        "accountKeys": ["Wallet", "TokenA", "Program"],
                        "instructions": [{"programIdIndex": 2, "accounts": [0, 1], "data": "2"}]
                    }
                }
            },
            {
                "meta": {"err": null},
                "transaction": {
                    "signatures": ["Good"],
                    "message": {
                        "accountKeys": ["Wallet", "Program"],
                        "instructions": [{"programIdIndex": 1, "accounts": [0], "data": "3"}]
                    }
                }
            }
        ]
    }"#;

    #[test]
    fn test_bad_transaction_does_not_sink_the_block() {
        let wire: WireBlock = serde_json::from_str(MIXED_BLOCK_JSON).expect("valid fixture");
        let block = wire.into_block(101).expect("block kept");

        let kept: Vec<(&str, u32)> = block
            .transactions
            .iter()
            .map(|tx| (tx.signature.as_str(), tx.index))
            .collect();
        assert_eq!(kept, vec![("BadAmount", 1), ("Good", 2)]);

        // The transaction survives without its balances
        let bad = &block.transactions[0];
        assert!(bad.token_balances.is_empty());
        assert_eq!(bad.instructions.len(), 1);
    }

    #[test]
    fn test_invalid_amount_is_anomaly() {
        let pre = vec![WireTokenBalance {
            account_index: 0,
            mint: "M".into(),
            owner: None,
            ui_token_amount: WireTokenAmount {
                amount: "abc".into(),
            },
        }];
        let err = merge_token_balances(pre, Vec::new()).expect_err("bad amount");
        assert!(matches!(err, IndexerError::DecodeAnomaly { .. }));
    }
}
