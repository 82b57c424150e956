//! Candidate-transaction filter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::rpc::types::Transaction;

/// Selects the transactions worth decoding.
///
/// A transaction matches when it succeeded and any of the following holds:
/// one of `program_ids` or `account_keys` appears in its account keys, or one
/// of `log_substrings` occurs in a log line. An empty filter matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Programs of interest
    pub program_ids: BTreeSet<String>,
    /// Additional accounts of interest (pools, wallets)
    pub account_keys: BTreeSet<String>,
    /// Log fragments such as `"initialize2"`
    pub log_substrings: BTreeSet<String>,
}

impl TransactionFilter {
    /// Filter on a set of program ids.
    #[must_use]
    pub fn for_programs<I, S>(program_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program_ids: program_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Also match transactions touching these accounts.
    #[must_use]
    pub fn with_accounts<I, S>(mut self, account_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.account_keys
            .extend(account_keys.into_iter().map(Into::into));
        self
    }

    /// Also match transactions whose logs contain any of these fragments.
    #[must_use]
    pub fn with_log_substrings<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_substrings
            .extend(fragments.into_iter().map(Into::into).filter(|s: &String| !s.is_empty()));
        self
    }

    /// Whether the filter has no criteria.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.program_ids.is_empty() && self.account_keys.is_empty() && self.log_substrings.is_empty()
    }

    /// Whether `transaction` should be forwarded to the decoders.
    #[must_use]
    pub fn matches(&self, transaction: &Transaction) -> bool {
        if transaction.failed {
            return false;
        }

        let by_key = transaction
            .account_keys
            .iter()
            .any(|key| self.program_ids.contains(key) || self.account_keys.contains(key));

        by_key
            || transaction.log_messages.iter().any(|line| {
                self.log_substrings
                    .iter()
                    .any(|fragment| line.contains(fragment.as_str()))
            })
    }
}

impl fmt::Display for TransactionFilter {
    /// Canonical, order-independent rendering used for job identity.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        write!(f, "programs={}", join(&self.program_ids))?;
        if !self.account_keys.is_empty() {
            write!(f, ";accounts={}", join(&self.account_keys))?;
        }
        if !self.log_substrings.is_empty() {
            write!(f, ";logs={}", join(&self.log_substrings))?;
        }
        Ok(())
    }
}
