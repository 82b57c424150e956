//! Solana JSON-RPC client over HTTP.
//!
//! ## Example
//!
//! ```no_run
//! use solana_pool_indexer::rpc::{ChainClient, Commitment, SolanaRpcClient};
//! use solana_pool_indexer::error::IndexerResult;
//! use std::time::Duration;
//!
//! # async fn example() -> IndexerResult<()> {
//! let client = SolanaRpcClient::new(
//!     "https://api.mainnet-beta.solana.com",
//!     8,
//!     Duration::from_secs(30),
//! )?;
//! let tip = client.get_slot(Commitment::Confirmed).await?;
//! println!("Current slot: {tip}");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::types::{Commitment, Transaction};
use super::wire::{RpcErrorObject, RpcResponse, WireBlock, WireConfirmedTransaction};
use super::{BlockFetch, ChainClient};
use crate::error::{IndexerError, IndexerResult};

/// Shared rate limiter type.
pub type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Slot was skipped, or its block is missing in long-term storage.
const MISSING_SLOT_CODES: [i64; 2] = [-32007, -32009];

/// Block not available yet, node unhealthy, block status unavailable, internal error.
const TRANSIENT_CODES: [i64; 4] = [-32004, -32005, -32014, -32603];

/// Create a rate limiter allowing `requests_per_second` calls.
#[must_use]
pub fn create_rate_limiter(requests_per_second: u32) -> SharedRateLimiter {
    let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
}

/// Reply of a JSON-RPC call after error classification.
enum RpcReply<T> {
    Value(T),
    Missing(String),
}

/// HTTP JSON-RPC chain client.
pub struct SolanaRpcClient {
    http: reqwest::Client,
    url: String,
    limiter: SharedRateLimiter,
    next_id: AtomicU64,
}

impl SolanaRpcClient {
    /// Create a client for `url`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is not http(s) or the HTTP
    /// client cannot be built.
    pub fn new(url: &str, requests_per_second: u32, timeout: Duration) -> IndexerResult<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(IndexerError::config(
                format!("Invalid RPC URL: '{url}'. Expected an http(s) endpoint, e.g. 'https://api.mainnet-beta.solana.com'"),
                None,
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::config("Failed to build HTTP client", Some(Box::new(e))))?;

        Ok(Self {
            http,
            url: url.to_string(),
            limiter: create_rate_limiter(requests_per_second),
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint host, without path or query (which may carry API keys).
    #[must_use]
    pub fn host(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map_or(self.url.as_str(), |(_, rest)| rest);
        without_scheme.split(['/', '?']).next().unwrap_or("unknown")
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> IndexerResult<RpcReply<T>> {
        self.limiter.until_ready().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexerError::transient(format!("{method} request failed: {e}"), Some(Box::new(e))))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IndexerError::authentication(format!(
                "{method} rejected by {} with HTTP {status}",
                self.host()
            )));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(IndexerError::transient(format!("{method} returned HTTP {status}"), None));
        }
        if !status.is_success() {
            return Err(IndexerError::fatal(format!("{method} returned HTTP {status}"), None));
        }

        let envelope: RpcResponse<T> = response.json().await.map_err(|e| {
            IndexerError::transient(format!("{method} returned an unreadable body: {e}"), Some(Box::new(e)))
        })?;

        if let Some(error) = envelope.error {
            return classify_rpc_error(method, &error);
        }

        Ok(envelope.result.map_or_else(
            || RpcReply::Missing(format!("{method} returned null")),
            RpcReply::Value,
        ))
    }
}

fn classify_rpc_error<T>(method: &str, error: &RpcErrorObject) -> IndexerResult<RpcReply<T>> {
    if MISSING_SLOT_CODES.contains(&error.code) {
        return Ok(RpcReply::Missing(error.message.clone()));
    }
    if TRANSIENT_CODES.contains(&error.code) {
        return Err(IndexerError::transient(
            format!("{method} error {}: {}", error.code, error.message),
            None,
        ));
    }
    Err(IndexerError::fatal(
        format!("{method} error {}: {}", error.code, error.message),
        None,
    ))
}

#[async_trait]
impl ChainClient for SolanaRpcClient {
    #[instrument(skip(self), fields(rpc_host = self.host()))]
    async fn get_block(&self, slot: u64, commitment: Commitment) -> IndexerResult<BlockFetch> {
        let params = json!([slot, {
            "encoding": "json",
            "maxSupportedTransactionVersion": 0,
            "transactionDetails": "full",
            "rewards": false,
            "commitment": commitment.as_str(),
        }]);

        match self.call::<WireBlock>("getBlock", params).await? {
            RpcReply::Value(block) => {
                let block = block.into_block(slot)?;
                debug!(slot, transactions = block.transactions.len(), "Block fetched");
                Ok(BlockFetch::Found(block))
            }
            RpcReply::Missing(reason) => {
                warn!(slot, reason = %reason, "Slot has no block");
                Ok(BlockFetch::NotFound { reason })
            }
        }
    }

    #[instrument(skip(self), fields(rpc_host = self.host()))]
    async fn get_transaction(
        &self,
        signature: &str,
        commitment: Commitment,
    ) -> IndexerResult<Option<Transaction>> {
        let params = json!([signature, {
            "encoding": "json",
            "maxSupportedTransactionVersion": 0,
            "commitment": commitment.as_str(),
        }]);

        match self
            .call::<WireConfirmedTransaction>("getTransaction", params)
            .await?
        {
            RpcReply::Value(tx) => Ok(Some(tx.into_transaction()?)),
            RpcReply::Missing(_) => Ok(None),
        }
    }

    #[instrument(skip(self), fields(rpc_host = self.host()))]
    async fn get_slot(&self, commitment: Commitment) -> IndexerResult<u64> {
        let params = json!([{ "commitment": commitment.as_str() }]);
        match self.call::<u64>("getSlot", params).await? {
            RpcReply::Value(slot) => Ok(slot),
            RpcReply::Missing(reason) => Err(IndexerError::transient(
                format!("getSlot returned no slot: {reason}"),
                None,
            )),
        }
    }

    #[instrument(skip(self), fields(rpc_host = self.host()))]
    async fn get_block_time(&self, slot: u64) -> IndexerResult<Option<i64>> {
        match self.call::<i64>("getBlockTime", json!([slot])).await? {
            RpcReply::Value(time) => Ok(Some(time)),
            RpcReply::Missing(reason) => {
                debug!(slot, reason = %reason, "No block time");
                Ok(None)
            }
        }
    }
}
