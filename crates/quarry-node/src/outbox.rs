//! Outbound path: stamp, wrap, enqueue.

use std::sync::Arc;

use quarry_proto::{Envelope, MessageKind, NodeMessage, Recipient};

use crate::error::Result;
use crate::roster::RosterHandle;

/// Builds messages as this node, wraps them in the causal envelope and
/// queues them on the roster actor.
#[derive(Clone)]
pub struct Outbox {
    identity: String,
    local_addr: String,
    envelope: Arc<dyn Envelope>,
    roster: RosterHandle,
}

impl Outbox {
    pub fn new(
        identity: impl Into<String>,
        local_addr: impl Into<String>,
        envelope: Arc<dyn Envelope>,
        roster: RosterHandle,
    ) -> Self {
        Self {
            identity: identity.into(),
            local_addr: local_addr.into(),
            envelope,
            roster,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn envelope(&self) -> &Arc<dyn Envelope> {
        &self.envelope
    }

    pub fn roster(&self) -> &RosterHandle {
        &self.roster
    }

    /// A message of `kind` from this node, other fields empty.
    pub fn message(&self, kind: MessageKind) -> NodeMessage {
        NodeMessage::new(kind, self.identity.clone(), self.local_addr.clone())
    }

    fn wrap(&self, message: &NodeMessage) -> Result<Vec<u8>> {
        Ok(self.envelope.wrap(message)?)
    }

    pub async fn send(&self, recipient: Recipient, message: &NodeMessage) -> Result<()> {
        let payload = self.wrap(message)?;
        self.roster.send(recipient, payload).await
    }

    /// Acknowledge move `seq` back to `identifier`.
    pub async fn send_ack(&self, identifier: &str, seq: u64) -> Result<()> {
        let message = self.message(MessageKind::Ack).with_seq(seq);
        self.send(Recipient::peer(identifier), &message).await
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("identity", &self.identity)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
