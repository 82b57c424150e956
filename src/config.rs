//! Configuration management for the pool indexer.
//!
//! Configuration is loaded once from environment variables (with `.env`
//! support through `dotenvy`) and then passed explicitly to each component.
//! Nothing below this module reads the environment.
//!
//! ## Environment Variables
//!
//! All optional (with defaults):
//! - `SOLANA_RPC_URL`: JSON-RPC endpoint (default: `https://api.mainnet-beta.solana.com`)
//! - `DATABASE_URL`: SQLite database (default: `sqlite:./indexer.db`)
//! - `COMMITMENT`: `processed`, `confirmed` or `finalized` (default: `confirmed`)
//! - `PROGRAM_IDS`: comma-separated program ids (default: Raydium AMM v4)
//! - `MAX_REQUESTS_PER_SECOND`: RPC rate limit (default: 8)
//! - `RPC_TIMEOUT_SECS`: per-request timeout (default: 30)
//! - `MAX_FETCH_ATTEMPTS`: attempts per block before escalating (default: 7)
//! - `INITIAL_BACKOFF_MS` / `MAX_BACKOFF_MS`: retry delays (default: 500 / 60000)
//! - `MAX_CONSECUTIVE_FAILURES`: escalations before the job aborts (default: 10)
//! - `PREFETCH_WINDOW`: concurrent block fetches (default: 4)
//! - `PENDING_RETENTION_SLOTS`: slots a swap waits for its pool (default: 150)
//! - `PENDING_CAPACITY`: maximum pending swaps (default: 10000)
//! - `POLL_INTERVAL_SECS`: tip polling interval in follow mode (default: 2)
//! - `RUST_LOG`: Logging filter (see [`crate::observability`])
//!
//! ## Example
//!
//! ```no_run
//! use solana_pool_indexer::config::Config;
//! use solana_pool_indexer::error::IndexerResult;
//!
//! # fn main() -> IndexerResult<()> {
//! let config = Config::from_env()?;
//! println!("RPC URL: {}", config.rpc_url());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::decoder::RAYDIUM_AMM_V4_PROGRAM_ID;
use crate::error::{IndexerError, IndexerResult};
use crate::index::IndexOptions;
use crate::rpc::{Backoff, Commitment};
use crate::scanner::{ScanOptions, TransactionFilter};

/// Largest accepted prefetch window.
pub const MAX_PREFETCH_WINDOW: usize = 64;

/// Main configuration struct for the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    rpc_url: String,
    database_url: String,
    commitment: Commitment,
    program_ids: Vec<String>,
    max_requests_per_second: u32,
    rpc_timeout: Duration,
    max_fetch_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_consecutive_failures: u32,
    prefetch_window: usize,
    pending_retention_slots: u64,
    pending_capacity: u64,
    poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This function:
    /// 1. Loads `.env` file using `dotenvy` (if present)
    /// 2. Reads and validates all environment variables
    /// 3. Applies defaults for unset variables
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a value does not parse or fails
    /// validation (e.g. a program id that is not a base58 public key).
    pub fn from_env() -> IndexerResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> IndexerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let rpc_url = get("SOLANA_RPC_URL", "https://api.mainnet-beta.solana.com");
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            return Err(IndexerError::config(
                format!("SOLANA_RPC_URL must be an http(s) URL, got: {rpc_url}"),
                None,
            ));
        }

        let database_url = get("DATABASE_URL", "sqlite:./indexer.db");
        if !database_url.starts_with("sqlite:") {
            return Err(IndexerError::config(
                format!("DATABASE_URL must be a sqlite: URL, got: {database_url}"),
                None,
            ));
        }

        let commitment: Commitment = get("COMMITMENT", "confirmed").parse()?;
        let program_ids = parse_pubkey_list("PROGRAM_IDS", &get("PROGRAM_IDS", RAYDIUM_AMM_V4_PROGRAM_ID))?;

        let max_requests_per_second: u32 = parse_number("MAX_REQUESTS_PER_SECOND", &get("MAX_REQUESTS_PER_SECOND", "8"))?;
        let rpc_timeout_secs: u64 = parse_number("RPC_TIMEOUT_SECS", &get("RPC_TIMEOUT_SECS", "30"))?;
        let max_fetch_attempts: u32 = parse_number("MAX_FETCH_ATTEMPTS", &get("MAX_FETCH_ATTEMPTS", "7"))?;
        let initial_backoff_ms: u64 = parse_number("INITIAL_BACKOFF_MS", &get("INITIAL_BACKOFF_MS", "500"))?;
        let max_backoff_ms: u64 = parse_number("MAX_BACKOFF_MS", &get("MAX_BACKOFF_MS", "60000"))?;
        let max_consecutive_failures: u32 =
            parse_number("MAX_CONSECUTIVE_FAILURES", &get("MAX_CONSECUTIVE_FAILURES", "10"))?;
        let prefetch_window: usize = parse_number("PREFETCH_WINDOW", &get("PREFETCH_WINDOW", "4"))?;
        let pending_retention_slots: u64 =
            parse_number("PENDING_RETENTION_SLOTS", &get("PENDING_RETENTION_SLOTS", "150"))?;
        let pending_capacity: u64 = parse_number("PENDING_CAPACITY", &get("PENDING_CAPACITY", "10000"))?;
        let poll_interval_secs: u64 = parse_number("POLL_INTERVAL_SECS", &get("POLL_INTERVAL_SECS", "2"))?;

        let positive = [
            ("MAX_REQUESTS_PER_SECOND", u64::from(max_requests_per_second)),
            ("RPC_TIMEOUT_SECS", rpc_timeout_secs),
            ("MAX_FETCH_ATTEMPTS", u64::from(max_fetch_attempts)),
            ("MAX_CONSECUTIVE_FAILURES", u64::from(max_consecutive_failures)),
            ("PENDING_CAPACITY", pending_capacity),
            ("POLL_INTERVAL_SECS", poll_interval_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(IndexerError::config(format!("{name} must be greater than 0"), None));
        }

        if !(1..=MAX_PREFETCH_WINDOW).contains(&prefetch_window) {
            return Err(IndexerError::config(
                format!("PREFETCH_WINDOW must be between 1 and {MAX_PREFETCH_WINDOW}, got: {prefetch_window}"),
                None,
            ));
        }

        if initial_backoff_ms > max_backoff_ms {
            return Err(IndexerError::config(
                format!("INITIAL_BACKOFF_MS ({initial_backoff_ms}) must not exceed MAX_BACKOFF_MS ({max_backoff_ms})"),
                None,
            ));
        }

        Ok(Self {
            rpc_url,
            database_url,
            commitment,
            program_ids,
            max_requests_per_second,
            rpc_timeout: Duration::from_secs(rpc_timeout_secs),
            max_fetch_attempts,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            max_consecutive_failures,
            prefetch_window,
            pending_retention_slots,
            pending_capacity,
            poll_interval: Duration::from_secs(poll_interval_secs),
        })
    }

    /// Get the Solana RPC URL.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Get the default commitment level.
    #[must_use]
    pub const fn commitment(&self) -> Commitment {
        self.commitment
    }

    /// Get the default program ids.
    #[must_use]
    pub fn program_ids(&self) -> &[String] {
        &self.program_ids
    }

    /// Get the RPC rate limit.
    #[must_use]
    pub const fn max_requests_per_second(&self) -> u32 {
        self.max_requests_per_second
    }

    /// Get the per-request timeout.
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Get the polling interval for follow mode.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Retry policy for block fetches.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        Backoff::new(self.max_fetch_attempts, self.initial_backoff, self.max_backoff)
    }

    /// Pending-buffer policy for the pool index.
    #[must_use]
    pub const fn index_options(&self) -> IndexOptions {
        IndexOptions {
            retention_slots: self.pending_retention_slots,
            pending_capacity: self.pending_capacity,
        }
    }

    /// Scan job settings for `filter` at `commitment`, with this
    /// configuration's defaults and an open range.
    #[must_use]
    pub fn scan_config(&self, filter: TransactionFilter, commitment: Commitment) -> ScanConfig {
        ScanConfig {
            filter,
            from_slot: None,
            to_slot: None,
            follow: false,
            options: ScanOptions {
                commitment,
                prefetch_window: self.prefetch_window,
                backoff: self.backoff(),
            },
            max_consecutive_failures: self.max_consecutive_failures,
            poll_interval: self.poll_interval,
        }
    }
}

/// Settings of one scan job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Candidate-transaction filter; together with the commitment it
    /// identifies the job's cursor
    pub filter: TransactionFilter,
    /// First slot; `None` resumes from the cursor (or the chain tip for a new job)
    pub from_slot: Option<u64>,
    /// Last slot; `None` scans to the chain tip
    pub to_slot: Option<u64>,
    /// Keep polling for new slots after reaching the tip
    pub follow: bool,
    /// Scanner tuning, including the commitment level
    pub options: ScanOptions,
    /// Consecutive failed slots tolerated before the job aborts
    pub max_consecutive_failures: u32,
    /// Delay between tip polls in follow mode
    pub poll_interval: Duration,
}

impl ScanConfig {
    /// Job settings with default tuning.
    #[must_use]
    pub fn new(filter: TransactionFilter, commitment: Commitment) -> Self {
        Self {
            filter,
            from_slot: None,
            to_slot: None,
            follow: false,
            options: ScanOptions {
                commitment,
                ..ScanOptions::default()
            },
            max_consecutive_failures: 10,
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Restrict the job to `from..=to`.
    #[must_use]
    pub const fn with_range(mut self, from: Option<u64>, to: Option<u64>) -> Self {
        self.from_slot = from;
        self.to_slot = to;
        self
    }

    /// Commitment level the job scans at.
    #[must_use]
    pub const fn commitment(&self) -> Commitment {
        self.options.commitment
    }

    /// Check the settings before a run.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty filter or an inverted range.
    pub fn validate(&self) -> IndexerResult<()> {
        if self.filter.is_empty() {
            return Err(IndexerError::config(
                "Scan filter is empty: give at least one program id, account or log fragment",
                None,
            ));
        }
        if let (Some(from), Some(to)) = (self.from_slot, self.to_slot) {
            if from > to {
                return Err(IndexerError::config(
                    format!("Invalid slot range: --from {from} is after --to {to}"),
                    None,
                ));
            }
        }
        if self.follow && self.to_slot.is_some() {
            return Err(IndexerError::config("--follow cannot be combined with --to", None));
        }
        // getBlock only serves confirmed and finalized blocks
        if self.commitment() == Commitment::Processed {
            return Err(IndexerError::config(
                "Commitment 'processed' cannot be scanned: use confirmed or finalized",
                None,
            ));
        }
        Ok(())
    }
}

/// Check that `value` is a base58-encoded 32-byte public key.
///
/// # Errors
///
/// Returns a configuration error naming `what`.
pub fn validate_pubkey(what: &str, value: &str) -> IndexerResult<()> {
    let bytes = bs58::decode(value).into_vec().map_err(|e| {
        IndexerError::config(format!("{what}: '{value}' is not base58"), Some(Box::new(e)))
    })?;
    if bytes.len() != 32 {
        return Err(IndexerError::config(
            format!("{what}: '{value}' decodes to {} bytes, expected 32", bytes.len()),
            None,
        ));
    }
    Ok(())
}

/// Parse a comma-separated list of public keys, ignoring blanks and duplicates.
///
/// # Errors
///
/// Returns a configuration error for the first invalid key.
pub fn parse_pubkey_list(what: &str, raw: &str) -> IndexerResult<Vec<String>> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        validate_pubkey(what, key)?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}

fn parse_number<T>(name: &str, raw: &str) -> IndexerResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(|e| {
        IndexerError::config(format!("{name} must be a valid number, got: {raw}"), Some(Box::new(e)))
    })
}
