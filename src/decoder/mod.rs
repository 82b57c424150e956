//! Program-specific instruction decoding.
//!
//! Each supported program implements [`EventDecoder`]; the [`DecoderRegistry`]
//! maps program ids to decoders so new exchange protocols plug in without
//! touching the scanner or the index.
//!
//! Decoders never fail: an instruction of a registered program that cannot be
//! parsed becomes a [`DomainEvent::Unrecognized`] marker carrying the
//! instruction index and a diagnostic.

pub mod raydium;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::events::{DomainEvent, EventPosition, Unrecognized};
use crate::rpc::types::{Instruction, Transaction};

pub use raydium::{RaydiumAmmV4Decoder, RAYDIUM_AMM_V4_PROGRAM_ID};

/// Decoder for the instructions of a single program.
pub trait EventDecoder: Send + Sync {
    /// Program whose instruction layout this decoder understands.
    fn program_id(&self) -> &str;

    /// Decode every instruction of [`EventDecoder::program_id`] in `transaction`,
    /// top-level and inner, in instruction order.
    fn decode(&self, transaction: &Transaction) -> Vec<DomainEvent>;
}

/// Program id → decoder lookup.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: BTreeMap<String, Arc<dyn EventDecoder>>,
}

impl DecoderRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every decoder shipped by this crate.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RaydiumAmmV4Decoder));
        registry
    }

    /// Register a decoder, replacing any previous decoder for the same program.
    pub fn register(&mut self, decoder: Arc<dyn EventDecoder>) {
        self.decoders
            .insert(decoder.program_id().to_string(), decoder);
    }

    /// Whether a decoder exists for `program_id`.
    #[must_use]
    pub fn supports(&self, program_id: &str) -> bool {
        self.decoders.contains_key(program_id)
    }

    /// Registered program ids, sorted.
    #[must_use]
    pub fn program_ids(&self) -> Vec<String> {
        self.decoders.keys().cloned().collect()
    }

    /// Decode `transaction` with the decoder registered for `program_id`.
    /// Unknown programs yield no events.
    #[must_use]
    pub fn decode(&self, transaction: &Transaction, program_id: &str) -> Vec<DomainEvent> {
        self.decoders
            .get(program_id)
            .map(|decoder| decoder.decode(transaction))
            .unwrap_or_default()
    }

    /// Run every registered decoder whose program appears in `transaction`,
    /// returning all events ordered by instruction position.
    #[must_use]
    pub fn decode_transaction(&self, transaction: &Transaction) -> Vec<DomainEvent> {
        let mut events: Vec<DomainEvent> = self
            .decoders
            .values()
            .filter(|decoder| transaction.mentions(decoder.program_id()))
            .flat_map(|decoder| decoder.decode(transaction))
            .collect();
        events.sort_by_key(DomainEvent::position);
        events
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("programs", &self.program_ids())
            .finish()
    }
}

/// Ledger position of an instruction.
#[must_use]
pub const fn position_of(transaction: &Transaction, instruction: &Instruction) -> EventPosition {
    EventPosition::new(transaction.slot, transaction.index, instruction.index)
}

/// Build an `Unrecognized` marker for an instruction.
#[must_use]
pub fn unrecognized(
    transaction: &Transaction,
    instruction: &Instruction,
    program_id: &str,
    diagnostic: impl Into<String>,
) -> DomainEvent {
    DomainEvent::Unrecognized(Unrecognized {
        program_id: program_id.to_string(),
        signature: transaction.signature.clone(),
        position: position_of(transaction, instruction),
        diagnostic: diagnostic.into(),
    })
}
