//! Quorum threshold for self-originated moves.
//!
//! The comparison is strict: `ack_count > peer_count`. Do not relax it to
//! `>=`.

/// Maximum number of re-evaluations before a move is abandoned.
pub const REJECTION_MAX: u32 = 3;

/// Check if `ack_count` acknowledgements clear the bar for a roster of
/// `peer_count` peers.
///
/// # Examples
///
/// ```
/// use quarry_consensus::quorum_reached;
///
/// assert!(quorum_reached(1, 0));  // Alone: any ack will do
/// assert!(!quorum_reached(3, 3)); // Every peer acked: still not enough
/// assert!(quorum_reached(4, 3));
/// ```
pub const fn quorum_reached(ack_count: usize, peer_count: usize) -> bool {
    ack_count > peer_count
}

/// How many more acks are needed to reach quorum.
pub const fn acks_needed(ack_count: usize, peer_count: usize) -> usize {
    if quorum_reached(ack_count, peer_count) {
        0
    } else {
        peer_count + 1 - ack_count
    }
}
