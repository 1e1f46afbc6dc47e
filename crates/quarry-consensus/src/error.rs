//! Error types for quarry-consensus.

use thiserror::Error;

/// Errors raised by the ack ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No move with this sequence number is being tracked.
    #[error("unknown sequence number {0}")]
    UnknownSequence(u64),

    /// A move with this sequence number is already being tracked.
    #[error("sequence number {0} is already tracked")]
    DuplicateSequence(u64),
}
