//! Per-sequence ack bookkeeping.
//!
//! An entry holds the pending move and the set of peers that acked it, so a
//! sequence number has acks on record exactly while its move is in flight.

use std::collections::HashMap;

use quarry_proto::Coord;

use crate::error::LedgerError;
use crate::retry::{PendingMove, RetryPolicy, Verdict};

/// One in-flight move and who acknowledged it.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub pending: PendingMove,
    /// Distinct ackers, in receipt order.
    pub acks: Vec<String>,
}

/// Ack ledger keyed by sequence number.
#[derive(Debug, Default)]
pub struct AckLedger {
    entries: HashMap<u64, LedgerEntry>,
}

impl AckLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly announced move.
    pub fn open(&mut self, seq: u64, coord: Coord) -> Result<(), LedgerError> {
        if self.entries.contains_key(&seq) {
            return Err(LedgerError::DuplicateSequence(seq));
        }
        self.entries.insert(
            seq,
            LedgerEntry {
                pending: PendingMove::new(seq, coord),
                acks: Vec::new(),
            },
        );
        Ok(())
    }

    /// Record an ack from `peer`. Returns the number of distinct ackers.
    ///
    /// Repeat acks from the same peer are counted once.
    pub fn record_ack(&mut self, seq: u64, peer: &str) -> Result<usize, LedgerError> {
        let entry = self
            .entries
            .get_mut(&seq)
            .ok_or(LedgerError::UnknownSequence(seq))?;
        if !entry.acks.iter().any(|p| p == peer) {
            entry.acks.push(peer.to_string());
        }
        Ok(entry.acks.len())
    }

    /// Evaluate quorum for `seq` against a roster of `peer_count` peers.
    ///
    /// An abandoned move's entry is removed here. A committed entry stays
    /// until [`close`](Self::close) so late acks can still land.
    pub fn evaluate(&mut self, seq: u64, peer_count: usize, policy: &RetryPolicy) -> Option<Verdict> {
        let entry = self.entries.get_mut(&seq)?;
        let verdict = entry.pending.evaluate(entry.acks.len(), peer_count, policy)?;
        if verdict == Verdict::Abandon {
            self.entries.remove(&seq);
        }
        Some(verdict)
    }

    pub fn get(&self, seq: u64) -> Option<&LedgerEntry> {
        self.entries.get(&seq)
    }

    pub fn acks(&self, seq: u64) -> Option<&[String]> {
        self.entries.get(&seq).map(|e| e.acks.as_slice())
    }

    /// Roster members that never acked `seq`.
    pub fn unresponsive<'a>(&self, seq: u64, roster: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        let Some(entry) = self.entries.get(&seq) else {
            return Vec::new();
        };
        roster
            .into_iter()
            .filter(|peer| !entry.acks.contains(peer))
            .cloned()
            .collect()
    }

    /// Stop tracking `seq`.
    pub fn close(&mut self, seq: u64) -> Option<LedgerEntry> {
        self.entries.remove(&seq)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
