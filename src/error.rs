//! Error types for the pool indexer.
//!
//! This module provides a unified error type [`IndexerError`] covering every
//! failure a scan job can meet, from configuration problems to chain
//! reorganizations.
//!
//! # Design
//!
//! Errors fall into two groups:
//!
//! - **In-band** errors are recorded and scanning continues:
//!   [`IndexerError::TransientIo`] (retried with backoff),
//!   [`IndexerError::DataGap`], [`IndexerError::DecodeAnomaly`],
//!   [`IndexerError::ConsistencyViolation`] and [`IndexerError::ReorgDetected`].
//! - **Fatal** errors move the job to `Aborted` and make the process exit
//!   non-zero: [`IndexerError::AuthenticationError`],
//!   [`IndexerError::CursorCorruption`], [`IndexerError::DatabaseError`],
//!   [`IndexerError::MaxConsecutiveFailures`] and [`IndexerError::Fatal`].
//!
//! Use [`IndexerError::is_transient`] and [`IndexerError::is_fatal`] to route
//! an error instead of matching on variants.
//!
//! # Example
//!
//! ```
//! use solana_pool_indexer::error::{IndexerError, IndexerResult};
//!
//! fn validate_window(window: usize) -> IndexerResult<()> {
//!     if window == 0 {
//!         return Err(IndexerError::config("prefetch window cannot be zero", None));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

/// Result type alias using [`IndexerError`].
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Boxed source error carried by most variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the pool indexer.
#[derive(Debug)]
pub enum IndexerError {
    /// Configuration or environment variable errors.
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxError>,
    },

    /// Network, timeout or rate-limit failure talking to the RPC endpoint.
    ///
    /// Retried with exponential backoff up to a bounded attempt count.
    TransientIo {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxError>,
    },

    /// The provider reported a slot as skipped or unavailable.
    DataGap {
        /// Slot that has no block
        slot: u64,
        /// Provider explanation
        reason: String,
    },

    /// An instruction could not be decoded.
    DecodeAnomaly {
        /// Human-readable error message
        message: String,
    },

    /// Indexed data contradicts itself (duplicate creation, expired pending swap).
    ConsistencyViolation {
        /// Human-readable error message
        message: String,
    },

    /// A previously indexed slot no longer matches the chain.
    ReorgDetected {
        /// First slot whose contents diverged
        slot: u64,
        /// Block hash stored by the indexer
        expected: String,
        /// Block hash now reported by the chain
        found: String,
    },

    /// Database operation errors.
    DatabaseError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxError>,
    },

    /// The RPC endpoint rejected our credentials.
    AuthenticationError {
        /// Human-readable error message
        message: String,
    },

    /// Persisted cursor state is unreadable or contradicts itself.
    CursorCorruption {
        /// Human-readable error message
        message: String,
    },

    /// Too many transient failures in a row.
    MaxConsecutiveFailures {
        /// Number of consecutive failures observed
        attempts: u32,
        /// Last error encountered
        last_error: String,
    },

    /// Any other unrecoverable error.
    Fatal {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxError>,
    },
}

impl IndexerError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use solana_pool_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::config("SOLANA_RPC_URL is empty", None);
    /// assert!(matches!(err, IndexerError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new transient I/O error.
    ///
    /// # Example
    ///
    /// ```
    /// use solana_pool_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::transient("HTTP 429 Too Many Requests", None);
    /// assert!(err.is_transient());
    /// ```
    #[must_use]
    pub fn transient(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::TransientIo {
            message: message.into(),
            source,
        }
    }

    /// Create a data gap error for a skipped slot.
    #[must_use]
    pub fn data_gap(slot: u64, reason: impl Into<String>) -> Self {
        Self::DataGap {
            slot,
            reason: reason.into(),
        }
    }

    /// Create a decode anomaly.
    #[must_use]
    pub fn decode_anomaly(message: impl Into<String>) -> Self {
        Self::DecodeAnomaly {
            message: message.into(),
        }
    }

    /// Create a consistency violation.
    #[must_use]
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            message: message.into(),
        }
    }

    /// Create a reorg signal.
    #[must_use]
    pub fn reorg(slot: u64, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::ReorgDetected {
            slot,
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a new database error.
    ///
    /// # Example
    ///
    /// ```
    /// use solana_pool_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::database("Connection failed", None);
    /// assert!(err.is_fatal());
    /// ```
    #[must_use]
    pub fn database(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Create an authentication error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::AuthenticationError {
            message: message.into(),
        }
    }

    /// Create a cursor corruption error.
    #[must_use]
    pub fn cursor_corruption(message: impl Into<String>) -> Self {
        Self::CursorCorruption {
            message: message.into(),
        }
    }

    /// Create a max consecutive failures error.
    ///
    /// # Example
    ///
    /// ```
    /// use solana_pool_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::max_consecutive_failures(10, "timeout");
    /// assert!(matches!(err, IndexerError::MaxConsecutiveFailures { attempts: 10, .. }));
    /// ```
    #[must_use]
    pub fn max_consecutive_failures(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::MaxConsecutiveFailures {
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Create a generic fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Fatal {
            message: message.into(),
            source,
        }
    }

    /// Whether the error should be retried with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }

    /// Whether the error must halt the scan job.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigError { .. }
                | Self::DatabaseError { .. }
                | Self::AuthenticationError { .. }
                | Self::CursorCorruption { .. }
                | Self::MaxConsecutiveFailures { .. }
                | Self::Fatal { .. }
        )
    }
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::TransientIo { message, .. } => write!(f, "Transient I/O error: {message}"),
            Self::DataGap { slot, reason } => write!(f, "Data gap at slot {slot}: {reason}"),
            Self::DecodeAnomaly { message } => write!(f, "Decode anomaly: {message}"),
            Self::ConsistencyViolation { message } => {
                write!(f, "Consistency violation: {message}")
            }
            Self::ReorgDetected {
                slot,
                expected,
                found,
            } => write!(
                f,
                "Reorg detected at slot {slot}: expected hash {expected}, found {found}"
            ),
            Self::DatabaseError { message, .. } => write!(f, "Database error: {message}"),
            Self::AuthenticationError { message } => {
                write!(f, "Authentication error: {message}")
            }
            Self::CursorCorruption { message } => write!(f, "Cursor corruption: {message}"),
            Self::MaxConsecutiveFailures {
                attempts,
                last_error,
            } => write!(
                f,
                "Max consecutive failures ({attempts}) exceeded. Last error: {last_error}"
            ),
            Self::Fatal { message, .. } => write!(f, "Fatal error: {message}"),
        }
    }
}

impl std::error::Error for IndexerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::TransientIo { source, .. }
            | Self::DatabaseError { source, .. }
            | Self::Fatal { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::DataGap { .. }
            | Self::DecodeAnomaly { .. }
            | Self::ConsistencyViolation { .. }
            | Self::ReorgDetected { .. }
            | Self::AuthenticationError { .. }
            | Self::CursorCorruption { .. }
            | Self::MaxConsecutiveFailures { .. } => None,
        }
    }
}

impl From<sqlx::Error> for IndexerError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_error() {
        let err = IndexerError::config("test error", None);
        assert!(matches!(err, IndexerError::ConfigError { .. }));
        assert_eq!(err.to_string(), "Configuration error: test error");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_transient_error_is_not_fatal() {
        let err = IndexerError::transient("connection reset", None);
        assert!(err.is_transient());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Transient I/O error: connection reset");
    }

    #[test]
    fn test_in_band_errors_are_not_fatal() {
        let errors = [
            IndexerError::data_gap(100, "slot skipped"),
            IndexerError::decode_anomaly("short data"),
            IndexerError::consistency("duplicate pool"),
            IndexerError::reorg(7, "aaa", "bbb"),
        ];
        for err in errors {
            assert!(!err.is_fatal(), "{err} should be recorded in-band");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_reorg_display() {
        let err = IndexerError::reorg(42, "hashA", "hashB");
        assert_eq!(
            err.to_string(),
            "Reorg detected at slot 42: expected hash hashA, found hashB"
        );
    }

    #[test]
    fn test_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = IndexerError::database("failed to open", Some(Box::new(source)));

        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Database error: failed to open");
    }

    #[test]
    fn test_max_consecutive_failures() {
        let err = IndexerError::max_consecutive_failures(3, "HTTP 503");
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Max consecutive failures (3) exceeded. Last error: HTTP 503"
        );
    }
}
