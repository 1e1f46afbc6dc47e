//! Protocol dispatcher: the inbound half of the node.
//!
//! [`Dispatcher::run`] owns the listening socket. Each datagram is unwrapped
//! by the envelope and handed to [`Dispatcher::dispatch`], which routes it by
//! kind. A handler error is logged and the loop moves on to the next
//! datagram; nothing a peer sends can stop the listener.

use std::sync::Arc;

use quarry_proto::{MessageKind, NodeMessage, Recipient, MAX_DATAGRAM_SIZE, PREY_IDENTIFIER};
use quarry_transfer::{resolve, TransportHandle};
use tracing::{debug, info, trace, warn};

use crate::commit::{check_authenticity_of_move_commit, CommitStore};
use crate::error::{Error, Result};
use crate::grid::MoveValidator;
use crate::outbox::Outbox;
use crate::quorum::QuorumHandle;
use crate::roster::PeerEndpoint;
use crate::SharedGameState;

/// Inbound message state machine.
pub struct Dispatcher {
    game_state: SharedGameState,
    commits: CommitStore,
    validator: Arc<dyn MoveValidator>,
    outbox: Outbox,
    quorum: QuorumHandle,
    transport: TransportHandle,
}

impl Dispatcher {
    pub fn new(
        game_state: SharedGameState,
        validator: Arc<dyn MoveValidator>,
        outbox: Outbox,
        quorum: QuorumHandle,
        transport: TransportHandle,
    ) -> Self {
        Self {
            game_state,
            commits: CommitStore::new(),
            validator,
            outbox,
            quorum,
            transport,
        }
    }

    /// Pending move commitments received from peers.
    pub fn commits(&self) -> &CommitStore {
        &self.commits
    }

    /// Listen for peer datagrams forever.
    pub async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        info!(
            identity = %self.outbox.identity(),
            addr = %self.outbox.local_addr(),
            "listening for peers"
        );

        loop {
            let (len, src) = match self.transport.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("UDP recv error: {e:#}");
                    continue;
                }
            };

            let message = match self.outbox.envelope().unwrap(&buf[..len]) {
                Ok(message) => message,
                Err(e) => {
                    warn!(%src, len, "dropping undecodable datagram: {e}");
                    continue;
                }
            };

            let kind = message.kind.clone();
            let from = message.identifier.clone();
            trace!(%kind, %from, %src, "received");
            if let Err(e) = self.dispatch(message).await {
                warn!(%kind, %from, "rejected message: {e}");
            }
        }
    }

    /// Route one unwrapped message to its handler.
    pub async fn dispatch(&mut self, message: NodeMessage) -> Result<()> {
        match message.kind {
            MessageKind::GameState => self.handle_game_state(message).await,
            MessageKind::MoveCommit => self.handle_move_commit(message),
            MessageKind::Move if message.identifier == PREY_IDENTIFIER => {
                self.handle_lockstep_move(message).await
            }
            MessageKind::Move => self.handle_move(message).await,
            MessageKind::Connect => self.handle_connect(message).await,
            MessageKind::Connected => {
                debug!(peer = %message.identifier, "handshake complete");
                Ok(())
            }
            MessageKind::Ack => {
                self.quorum
                    .handle_received_ack(message.seq, message.identifier)
                    .await
            }
            MessageKind::Captured => self.handle_capture(message).await,
            MessageKind::Unknown(ref kind) => {
                warn!(%kind, from = %message.identifier, "dropping message of unknown kind");
                Ok(())
            }
        }
    }

    async fn handle_game_state(&mut self, message: NodeMessage) -> Result<()> {
        let snapshot = message.game_state.ok_or_else(|| {
            Error::Malformed(format!("game state from {} has no snapshot", message.identifier))
        })?;
        debug!(from = %message.identifier, players = snapshot.player_locs.len(), "replacing game state");
        *self.game_state.write().await = snapshot;
        Ok(())
    }

    fn handle_move_commit(&mut self, message: NodeMessage) -> Result<()> {
        let commit = message.move_commit.ok_or_else(|| {
            Error::Malformed(format!("move commit from {} has no commitment", message.identifier))
        })?;

        if commit.identifier != message.identifier || !check_authenticity_of_move_commit(&commit) {
            return Err(Error::IncorrectPlayer(message.identifier));
        }

        if self.commits.insert_if_absent(&message.identifier, &commit.move_hash) {
            debug!(from = %message.identifier, "stored move commitment");
        } else {
            debug!(from = %message.identifier, "commitment already pending, keeping the first");
        }
        Ok(())
    }

    /// Reveal half of commit-reveal. The stored commitment is consumed
    /// whatever the outcome.
    async fn handle_lockstep_move(&mut self, message: NodeMessage) -> Result<()> {
        let id = message.identifier;
        let matched = message
            .coord
            .map(|coord| self.commits.check_move_commit_against_move(&id, coord));
        self.commits.remove(&id);

        let coord = match (message.coord, matched) {
            (Some(coord), Some(true)) => coord,
            (None, _) => return Err(Error::InvalidMove(format!("{id} revealed no move"))),
            (Some(coord), _) => {
                return Err(Error::InvalidMove(format!(
                    "{id} revealed {coord} without a matching commitment"
                )))
            }
        };

        self.validator.check_move(coord)?;
        self.game_state.write().await.player_locs.insert(id, coord);
        Ok(())
    }

    async fn handle_move(&mut self, message: NodeMessage) -> Result<()> {
        let coord = message.coord.ok_or_else(|| {
            Error::InvalidMove(format!("{} sent a move without a coordinate", message.identifier))
        })?;
        self.validator.check_move(coord)?;

        self.game_state
            .write()
            .await
            .player_locs
            .insert(message.identifier.clone(), coord);
        trace!(from = %message.identifier, seq = message.seq, %coord, "applied move");

        self.outbox.send_ack(&message.identifier, message.seq).await
    }

    async fn handle_connect(&mut self, message: NodeMessage) -> Result<()> {
        let addr = resolve(&message.addr).await?;
        let endpoint = PeerEndpoint::new(message.identifier.clone(), addr, self.transport.clone());
        self.outbox.roster().add(endpoint).await?;
        info!(peer = %message.identifier, %addr, "peer connected");

        let reply = self.outbox.message(MessageKind::Connected);
        self.outbox
            .send(Recipient::peer(message.identifier), &reply)
            .await
    }

    async fn handle_capture(&mut self, message: NodeMessage) -> Result<()> {
        let id = message.identifier;
        let coord = message
            .coord
            .ok_or_else(|| Error::InvalidPreyCapture(format!("{id} claimed a capture with no coordinate")))?;

        let mut state = self.game_state.write().await;
        if state.prey_location() != Some(coord) {
            return Err(Error::InvalidPreyCapture(format!(
                "{id} claimed the prey at {coord}"
            )));
        }
        self.validator.check_move(coord)?;

        let recorded = state.score_of(&id);
        match message.score {
            Some(claimed) if recorded.checked_add(1) == Some(claimed) => {
                state.player_scores.insert(id.clone(), claimed);
                info!(player = %id, score = claimed, %coord, "prey captured");
                Ok(())
            }
            claimed => Err(Error::InvalidScoreUpdate {
                identifier: id,
                recorded,
                claimed,
            }),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("outbox", &self.outbox)
            .field("commits", &self.commits)
            .finish_non_exhaustive()
    }
}
