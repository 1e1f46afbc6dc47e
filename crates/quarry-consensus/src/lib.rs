//! Ack-Quorum Consensus
//!
//! A logic node does not apply its own move the moment it decides on it.
//! It broadcasts the move with a sequence number and waits for peers to
//! acknowledge. Only when the ack count clears the quorum bar does the move
//! become part of the local game state.
//!
//! # Quorum Bar
//!
//! Quorum is **strictly more acks than peers in the roster**:
//!
//! ```text
//! ack_count > peer_count
//! ```
//!
//! This is deliberately stricter than a simple majority. With a roster of
//! three peers a move needs four distinct acks.
//!
//! # Bounded Retry
//!
//! Each in-flight move walks a small state machine:
//!
//! ```text
//! Pending ──quorum──────────────────────────▶ Committed
//!    │
//!    └─no quorum─▶ Retrying(1) ─▶ ... ─▶ Retrying(max) ─no quorum─▶ Abandoned
//! ```
//!
//! This crate is pure bookkeeping: no clocks, no sockets. The node crate
//! drives it from an actor and owns the timers.

mod error;
mod ledger;
mod retry;
mod threshold;

pub use error::LedgerError;
pub use ledger::{AckLedger, LedgerEntry};
pub use retry::{MoveState, PendingMove, RetryPolicy, Verdict};
pub use threshold::{acks_needed, quorum_reached, REJECTION_MAX};
