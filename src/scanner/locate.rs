//! Resolve a wall-clock time to a slot.
//!
//! Block times only grow with the slot number, so a binary search over
//! `getBlockTime` finds the first slot produced at or after a given time.
//! Skipped slots have no time; the search walks forward from them.

use tracing::{debug, info, instrument};

use crate::error::IndexerResult;
use crate::rpc::{Backoff, ChainClient, Commitment};

/// Slots walked forward from a slot without a block time.
pub const SCAN_WINDOW: u64 = 32;

/// First slot whose block time is at or after `unix_time`, or the chain tip
/// if every block is older.
///
/// A window of [`SCAN_WINDOW`] slots without any block time below the tip is
/// taken as pruned history, and the search continues above it.
///
/// # Errors
///
/// Fatal or authentication errors, and transient errors that outlast
/// `backoff`.
#[instrument(skip(client, backoff))]
pub async fn slot_at_time(
    client: &dyn ChainClient,
    commitment: Commitment,
    backoff: &Backoff,
    unix_time: i64,
) -> IndexerResult<u64> {
    let tip = backoff.retry("getSlot", || client.get_slot(commitment)).await?;

    let (mut lo, mut hi) = (0_u64, tip);
    let mut found = tip;
    let mut lookups = 0_u32;

    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let window_end = mid.saturating_add(SCAN_WINDOW - 1).min(hi);
        let timed = first_timed_slot(client, backoff, mid, window_end).await?;
        lookups += 1;

        match timed {
            Some((slot, time)) if time >= unix_time => {
                found = slot;
                if mid == 0 {
                    break;
                }
                hi = mid - 1;
            }
            Some((slot, _)) => lo = slot + 1,
            None if window_end == hi => {
                if mid == 0 {
                    break;
                }
                hi = mid - 1;
            }
            None => lo = window_end + 1,
        }
        debug!(lo, hi, found, "Narrowed slot search");
    }

    info!(unix_time, slot = found, tip, lookups, "Resolved time to slot");
    Ok(found)
}

/// First slot in `from..=to` with a block time.
async fn first_timed_slot(
    client: &dyn ChainClient,
    backoff: &Backoff,
    from: u64,
    to: u64,
) -> IndexerResult<Option<(u64, i64)>> {
    for slot in from..=to {
        if let Some(time) = backoff.retry("getBlockTime", || client.get_block_time(slot)).await? {
            return Ok(Some((slot, time)));
        }
    }
    Ok(None)
}
