//! Raydium AMM v4 instruction decoder.
//!
//! Instruction data starts with a one-byte tag followed by little-endian
//! arguments:
//!
//! | Tag | Instruction     | Arguments                                   |
//! |-----|-----------------|---------------------------------------------|
//! | 1   | `initialize2`   | nonce u8, open time u64, pc u64, coin u64   |
//! | 9   | `swapBaseIn`    | amount in u64, minimum amount out u64       |
//! | 11  | `swapBaseOut`   | maximum amount in u64, amount out u64       |
//!
//! Other known tags (deposit, withdraw, admin instructions) produce no
//! events. Tags outside the instruction set and truncated layouts produce
//! `Unrecognized` markers.
//!
//! Swap amounts come from the user's token-balance deltas when available,
//! since the arguments are only bounds (minimum out, maximum in).

use tracing::trace;

use super::{position_of, unrecognized, EventDecoder};
use crate::events::{DomainEvent, PoolCreated, SwapExecuted};
use crate::rpc::types::{Instruction, Transaction};

/// Raydium liquidity pool v4 program.
pub const RAYDIUM_AMM_V4_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

const TAG_INITIALIZE2: u8 = 1;
const TAG_SWAP_BASE_IN: u8 = 9;
const TAG_SWAP_BASE_OUT: u8 = 11;
const HIGHEST_KNOWN_TAG: u8 = 15;

const INITIALIZE2_DATA_LEN: usize = 1 + 1 + 8 + 8 + 8;
const SWAP_DATA_LEN: usize = 1 + 8 + 8;

// initialize2 account positions
const INIT_POOL_ACCOUNT: usize = 4;
const INIT_COIN_MINT_ACCOUNT: usize = 8;
const INIT_PC_MINT_ACCOUNT: usize = 9;
const INIT_CREATOR_ACCOUNT: usize = 17;

// swap account positions
const SWAP_POOL_ACCOUNT: usize = 1;
const SWAP_MIN_ACCOUNTS: usize = 17;

/// Decoder for [`RAYDIUM_AMM_V4_PROGRAM_ID`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RaydiumAmmV4Decoder;

impl EventDecoder for RaydiumAmmV4Decoder {
    fn program_id(&self) -> &str {
        RAYDIUM_AMM_V4_PROGRAM_ID
    }

    fn decode(&self, transaction: &Transaction) -> Vec<DomainEvent> {
        transaction
            .instructions
            .iter()
            .filter(|ix| transaction.program_id(ix) == Some(RAYDIUM_AMM_V4_PROGRAM_ID))
            .filter_map(|ix| decode_instruction(transaction, ix))
            .collect()
    }
}

fn decode_instruction(tx: &Transaction, ix: &Instruction) -> Option<DomainEvent> {
    let data = match ix.data_bytes() {
        Ok(data) => data,
        Err(e) => return Some(unrecognized(tx, ix, RAYDIUM_AMM_V4_PROGRAM_ID, e.to_string())),
    };

    let Some(&tag) = data.first() else {
        return Some(unrecognized(
            tx,
            ix,
            RAYDIUM_AMM_V4_PROGRAM_ID,
            "empty instruction data",
        ));
    };

    let decoded = match tag {
        TAG_INITIALIZE2 => decode_initialize2(tx, ix, &data),
        TAG_SWAP_BASE_IN | TAG_SWAP_BASE_OUT => decode_swap(tx, ix, tag, &data),
        tag if tag <= HIGHEST_KNOWN_TAG => {
            trace!(signature = %tx.signature, tag, "Ignoring non-event instruction");
            return None;
        }
        tag => Err(format!("unknown instruction tag {tag}")),
    };

    Some(decoded.unwrap_or_else(|diagnostic| {
        unrecognized(tx, ix, RAYDIUM_AMM_V4_PROGRAM_ID, diagnostic)
    }))
}

fn decode_initialize2(tx: &Transaction, ix: &Instruction, data: &[u8]) -> Result<DomainEvent, String> {
    if data.len() < INITIALIZE2_DATA_LEN {
        return Err(format!(
            "initialize2 data too short: {} bytes, expected {INITIALIZE2_DATA_LEN}",
            data.len()
        ));
    }

    let account = |n: usize| {
        tx.instruction_account(ix, n)
            .map(str::to_string)
            .ok_or_else(|| format!("initialize2 missing account {n} ({} accounts)", ix.accounts.len()))
    };

    let pool = account(INIT_POOL_ACCOUNT)?;
    let coin_mint = account(INIT_COIN_MINT_ACCOUNT)?;
    let pc_mint = account(INIT_PC_MINT_ACCOUNT)?;
    let creator = account(INIT_CREATOR_ACCOUNT).ok();

    Ok(DomainEvent::PoolCreated(PoolCreated {
        pool,
        mints: vec![coin_mint, pc_mint],
        program_id: RAYDIUM_AMM_V4_PROGRAM_ID.to_string(),
        creator,
        signature: tx.signature.clone(),
        position: position_of(tx, ix),
    }))
}

fn decode_swap(tx: &Transaction, ix: &Instruction, tag: u8, data: &[u8]) -> Result<DomainEvent, String> {
    let name = if tag == TAG_SWAP_BASE_IN { "swapBaseIn" } else { "swapBaseOut" };

    if data.len() < SWAP_DATA_LEN {
        return Err(format!(
            "{name} data too short: {} bytes, expected {SWAP_DATA_LEN}",
            data.len()
        ));
    }
    if ix.accounts.len() < SWAP_MIN_ACCOUNTS {
        return Err(format!(
            "{name} has {} accounts, expected at least {SWAP_MIN_ACCOUNTS}",
            ix.accounts.len()
        ));
    }

    let first = read_u64(data, 1).ok_or_else(|| format!("{name} first argument unreadable"))?;
    let second = read_u64(data, 9).ok_or_else(|| format!("{name} second argument unreadable"))?;

    let count = ix.accounts.len();
    let pool = tx.instruction_account(ix, SWAP_POOL_ACCOUNT).map(str::to_string);
    let trader = tx
        .instruction_account(ix, count - 1)
        .map(str::to_string)
        .ok_or_else(|| format!("{name} trader account out of range"))?;

    let source = ix.accounts.get(count - 3).and_then(|idx| tx.token_balance(*idx));
    let destination = ix.accounts.get(count - 2).and_then(|idx| tx.token_balance(*idx));

    // swapBaseIn: (amount in, minimum out); swapBaseOut: (maximum in, amount out)
    let amount_in = source
        .map(|b| b.decrease())
        .filter(|amount| *amount > 0)
        .unwrap_or(first);
    let amount_out = destination
        .map(|b| b.increase())
        .filter(|amount| *amount > 0)
        .unwrap_or(second);

    Ok(DomainEvent::SwapExecuted(SwapExecuted {
        pool,
        program_id: RAYDIUM_AMM_V4_PROGRAM_ID.to_string(),
        input_mint: source.map(|b| b.mint.clone()),
        amount_in,
        output_mint: destination.map(|b| b.mint.clone()),
        amount_out,
        trader,
        signature: tx.signature.clone(),
        position: position_of(tx, ix),
    }))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}
