//! Bounded-retry state machine for one in-flight move.

use std::time::Duration;

use quarry_proto::Coord;

use crate::threshold::{quorum_reached, REJECTION_MAX};

/// Timing and ceiling for quorum evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-evaluations allowed before the move is abandoned.
    pub max_rejections: u32,
    /// Wait between a failed evaluation and the next one.
    pub backoff: Duration,
    /// Wait after commit for late acks, before unresponsive peers are evicted.
    pub grace: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rejections: REJECTION_MAX,
            backoff: Duration::from_secs(1),
            grace: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Short timings for tests and local simulations.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_rejections: REJECTION_MAX,
            backoff: Duration::from_millis(40),
            grace: Duration::from_millis(80),
        }
    }
}

/// Where a move is in its quorum lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveState {
    /// Submitted, not evaluated yet.
    Pending,
    /// Evaluated and rejected this many times.
    Retrying(u32),
    /// Quorum reached; the move was applied.
    Committed,
    /// Rejection ceiling hit; the move was dropped.
    Abandoned,
}

impl MoveState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Abandoned)
    }
}

impl std::fmt::Display for MoveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Retrying(n) => write!(f, "Retrying({n})"),
            Self::Committed => write!(f, "Committed"),
            Self::Abandoned => write!(f, "Abandoned"),
        }
    }
}

/// Outcome of one quorum evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Apply the move.
    Commit,
    /// Re-announce the move and evaluate again after `after`.
    Retry { attempt: u32, after: Duration },
    /// Drop the move without applying it.
    Abandon,
}

/// A move this node originated and is waiting on acks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub seq: u64,
    pub coord: Coord,
    rejected: u32,
    state: MoveState,
}

impl PendingMove {
    pub fn new(seq: u64, coord: Coord) -> Self {
        Self {
            seq,
            coord,
            rejected: 0,
            state: MoveState::Pending,
        }
    }

    pub fn state(&self) -> MoveState {
        self.state
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Evaluate quorum and advance the state machine.
    ///
    /// Returns `None` once the move is in a terminal state.
    pub fn evaluate(
        &mut self,
        ack_count: usize,
        peer_count: usize,
        policy: &RetryPolicy,
    ) -> Option<Verdict> {
        if self.state.is_terminal() {
            return None;
        }

        if quorum_reached(ack_count, peer_count) {
            self.state = MoveState::Committed;
            return Some(Verdict::Commit);
        }

        if self.rejected < policy.max_rejections {
            self.rejected += 1;
            self.state = MoveState::Retrying(self.rejected);
            Some(Verdict::Retry {
                attempt: self.rejected,
                after: policy.backoff,
            })
        } else {
            self.state = MoveState::Abandoned;
            Some(Verdict::Abandon)
        }
    }
}
