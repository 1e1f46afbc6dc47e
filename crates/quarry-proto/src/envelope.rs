//! Causal envelope wrapped around every datagram.
//!
//! The envelope is a pure wrap/unwrap pair as far as the rest of the node is
//! concerned. It must be applied symmetrically: every outbound payload is
//! wrapped exactly once, every inbound datagram unwrapped exactly once, and
//! communicating nodes must run compatible envelope types.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::message::NodeMessage;
use crate::MAX_DATAGRAM_SIZE;

/// Wraps outgoing messages and unwraps incoming datagrams.
pub trait Envelope: Send + Sync {
    /// Encode `message` for the wire, attaching envelope metadata.
    fn wrap(&self, message: &NodeMessage) -> Result<Vec<u8>>;

    /// Strip envelope metadata from `datagram` and decode the message.
    fn unwrap(&self, datagram: &[u8]) -> Result<NodeMessage>;
}

fn check_size(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(Error::Oversized {
            len: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

/// Envelope without metadata: the message as bare JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainEnvelope;

impl Envelope for PlainEnvelope {
    fn wrap(&self, message: &NodeMessage) -> Result<Vec<u8>> {
        check_size(serde_json::to_vec(message)?)
    }

    fn unwrap(&self, datagram: &[u8]) -> Result<NodeMessage> {
        Ok(serde_json::from_slice(datagram)?)
    }
}

/// Vector clock keyed by process name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the local component for `process`.
    pub fn tick(&mut self, process: &str) -> u64 {
        let entry = self.0.entry(process.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Element-wise maximum with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (process, &time) in &other.0 {
            let entry = self.0.entry(process.clone()).or_insert(0);
            *entry = (*entry).max(time);
        }
    }

    pub fn get(&self, process: &str) -> u64 {
        self.0.get(process).copied().unwrap_or(0)
    }

    /// True if every component of `self` is <= the matching one in `other`.
    pub fn happened_before_or_equal(&self, other: &VectorClock) -> bool {
        self.0.iter().all(|(process, &time)| time <= other.get(process))
    }
}

#[derive(Serialize, Deserialize)]
struct CausalFrame {
    process: String,
    clock: VectorClock,
    payload: NodeMessage,
}

/// Vector-clock envelope.
///
/// Wrapping ticks the local clock and stamps the frame with it; unwrapping
/// merges the sender's clock into ours and ticks again.
#[derive(Debug)]
pub struct CausalEnvelope {
    process: String,
    clock: Mutex<VectorClock>,
}

impl CausalEnvelope {
    pub fn new(process: impl Into<String>) -> Self {
        Self {
            process: process.into(),
            clock: Mutex::new(VectorClock::new()),
        }
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    /// Copy of the current clock.
    pub fn clock(&self) -> VectorClock {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VectorClock> {
        // A poisoned clock is still a valid clock.
        self.clock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Envelope for CausalEnvelope {
    fn wrap(&self, message: &NodeMessage) -> Result<Vec<u8>> {
        let clock = {
            let mut clock = self.lock();
            clock.tick(&self.process);
            clock.clone()
        };
        trace!(process = %self.process, kind = %message.kind, "wrap outbound message");
        let frame = CausalFrame {
            process: self.process.clone(),
            clock,
            payload: message.clone(),
        };
        check_size(serde_json::to_vec(&frame)?)
    }

    fn unwrap(&self, datagram: &[u8]) -> Result<NodeMessage> {
        let frame: CausalFrame = serde_json::from_slice(datagram)?;
        let stale = {
            let mut clock = self.lock();
            // Nothing new in the frame's history: it was sent before
            // something we already merged.
            let stale = frame.clock.happened_before_or_equal(&clock);
            clock.merge(&frame.clock);
            clock.tick(&self.process);
            stale
        };
        trace!(
            process = %self.process,
            from = %frame.process,
            kind = %frame.payload.kind,
            stale,
            "unwrap inbound message"
        );
        Ok(frame.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::types::{Coord, GameState};

    fn sample() -> NodeMessage {
        NodeMessage::new(MessageKind::Move, "2", "127.0.0.1:7000")
            .with_coord(Coord::new(1, 1))
            .with_seq(5)
    }

    #[test]
    fn test_causal_clock_merges_on_receive() {
        let alice = CausalEnvelope::new("alice");
        let bob = CausalEnvelope::new("bob");

        let first = alice.wrap(&sample()).unwrap();
        let second = alice.wrap(&sample()).unwrap();
        assert_eq!(alice.clock().get("alice"), 2);

        let msg = bob.unwrap(&second).unwrap();
        assert_eq!(msg, sample());
        let clock = bob.clock();
        assert_eq!(clock.get("alice"), 2);
        assert_eq!(clock.get("bob"), 1);

        // A stale frame never moves the merged component backwards.
        bob.unwrap(&first).unwrap();
        assert_eq!(bob.clock().get("alice"), 2);
        assert_eq!(bob.clock().get("bob"), 2);
        assert!(alice.clock().happened_before_or_equal(&bob.clock()));
    }

    #[test]
    fn test_envelopes_are_not_interchangeable() {
        let wrapped = CausalEnvelope::new("a").wrap(&sample()).unwrap();
        assert!(PlainEnvelope.unwrap(&wrapped).is_err());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut state = GameState::default();
        for i in 0..400 {
            state.player_locs.insert(format!("player-{i}"), Coord::new(i, i));
        }
        let msg = NodeMessage::new(MessageKind::GameState, "1", "").with_game_state(state);
        match PlainEnvelope.wrap(&msg) {
            Err(Error::Oversized { max, .. }) => assert_eq!(max, MAX_DATAGRAM_SIZE),
            other => panic!("expected oversize error, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_datagram_is_an_error() {
        assert!(PlainEnvelope.unwrap(b"\x00\x01not json").is_err());
        assert!(CausalEnvelope::new("x").unwrap(b"{}").is_err());
    }
}
