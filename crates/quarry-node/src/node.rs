//! [`NodeComm`]: what gameplay code talks to.
//!
//! Built with [`NodeCommBuilder`], which spawns the roster and quorum actors
//! and hands back the [`Dispatcher`] for the caller to run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ed25519_dalek::{SigningKey, VerifyingKey};
use quarry_proto::{Coord, Envelope, GameState, MessageKind, MoveCommit, PlainEnvelope, Recipient};
use quarry_transfer::{resolve, TransportHandle};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::commit::create_move_commit;
use crate::config::NodeConfig;
use crate::directory::DirectoryClient;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::grid::{GridBounds, GridSettings, MoveValidator};
use crate::outbox::Outbox;
use crate::quorum::{QuorumHandle, QuorumTracker};
use crate::roster::{PeerEndpoint, PeerRoster, RosterHandle};
use crate::SharedGameState;

/// Assembles a [`NodeComm`] and its [`Dispatcher`].
#[must_use]
pub struct NodeCommBuilder {
    identity: String,
    signing_key: SigningKey,
    transport: TransportHandle,
    advertise_addr: Option<String>,
    envelope: Option<Arc<dyn Envelope>>,
    validator: Option<Arc<dyn MoveValidator>>,
    game_state: Option<SharedGameState>,
    roster: Option<RosterHandle>,
    config: NodeConfig,
}

impl NodeCommBuilder {
    pub fn new(identity: impl Into<String>, signing_key: SigningKey, transport: TransportHandle) -> Self {
        Self {
            identity: identity.into(),
            signing_key,
            transport,
            advertise_addr: None,
            envelope: None,
            validator: None,
            game_state: None,
            roster: None,
            config: NodeConfig::default(),
        }
    }

    /// Address peers should send to. Defaults to the config's advertise
    /// address, then to the socket's bound address.
    pub fn with_advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.advertise_addr = Some(addr.into());
        self
    }

    /// Envelope for every datagram. Defaults to [`PlainEnvelope`].
    pub fn with_envelope(mut self, envelope: Arc<dyn Envelope>) -> Self {
        self.envelope = Some(envelope);
        self
    }

    /// Move oracle. Defaults to an empty 20x20 grid.
    pub fn with_validator(mut self, validator: Arc<dyn MoveValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Share an existing game state instead of starting from an empty one.
    pub fn with_game_state(mut self, game_state: SharedGameState) -> Self {
        self.game_state = Some(game_state);
        self
    }

    /// Use an existing roster actor instead of spawning one.
    pub fn with_roster(mut self, roster: RosterHandle) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the quorum actor, and the roster actor unless one was given.
    ///
    /// Must be called inside a tokio runtime. The returned dispatcher is not
    /// started; spawn [`Dispatcher::run`] to begin receiving.
    pub fn start(self) -> Result<(NodeComm, Dispatcher)> {
        let advertise_addr = match self.advertise_addr.or(self.config.advertise_addr) {
            Some(addr) => addr,
            None => self.transport.local_addr()?.to_string(),
        };
        let envelope = self.envelope.unwrap_or_else(|| Arc::new(PlainEnvelope));
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(GridBounds::new(&GridSettings::default())));
        let game_state = self
            .game_state
            .unwrap_or_else(|| Arc::new(RwLock::new(GameState::default())));

        let roster = match self.roster {
            Some(roster) => roster,
            None => PeerRoster::spawn(&self.config.roster),
        };
        let outbox = Outbox::new(self.identity.clone(), advertise_addr, envelope, roster);
        let quorum = QuorumTracker::spawn(outbox.clone(), self.config.quorum, game_state.clone());
        let dispatcher = Dispatcher::new(
            game_state.clone(),
            validator.clone(),
            outbox.clone(),
            quorum.clone(),
            self.transport.clone(),
        );

        info!(identity = %self.identity, addr = %outbox.local_addr(), "node communication started");
        let node = NodeComm {
            identity: self.identity,
            signing_key: self.signing_key,
            transport: self.transport,
            game_state,
            validator,
            outbox,
            quorum,
            sequence: AtomicU64::new(0),
        };
        Ok((node, dispatcher))
    }
}

/// Outbound side of a logic node.
pub struct NodeComm {
    identity: String,
    signing_key: SigningKey,
    transport: TransportHandle,
    game_state: SharedGameState,
    validator: Arc<dyn MoveValidator>,
    outbox: Outbox,
    quorum: QuorumHandle,
    sequence: AtomicU64,
}

impl NodeComm {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Address announced to peers.
    pub fn local_addr(&self) -> &str {
        self.outbox.local_addr()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn game_state(&self) -> &SharedGameState {
        &self.game_state
    }

    pub fn roster(&self) -> &RosterHandle {
        self.outbox.roster()
    }

    pub fn quorum(&self) -> &QuorumHandle {
        &self.quorum
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Broadcast a quorum-tracked move.
    ///
    /// Returns the sequence number the move went out under, or `None` if
    /// there was no move to send. The move is applied locally only once the
    /// quorum tracker commits it.
    pub async fn send_move_to_nodes(&self, coord: Option<Coord>) -> Result<Option<u64>> {
        let Some(coord) = coord else {
            debug!("no move to send");
            return Ok(None);
        };
        self.validator.check_move(coord)?;

        let seq = self.next_sequence();
        let message = self
            .outbox
            .message(MessageKind::Move)
            .with_coord(coord)
            .with_seq(seq);

        // Open the ledger entry first so an ack can never beat it.
        self.quorum.submit(seq, coord)?;
        self.outbox.send(Recipient::All, &message).await?;
        debug!(seq, %coord, "move sent");
        Ok(Some(seq))
    }

    /// Unicast the full local game state to `identifier`.
    pub async fn send_game_state_to_node(&self, identifier: &str) -> Result<()> {
        let snapshot = self.game_state.read().await.clone();
        let message = self.outbox.message(MessageKind::GameState).with_game_state(snapshot);
        self.outbox.send(Recipient::peer(identifier), &message).await
    }

    /// Hash and sign a commitment to `coord`.
    pub fn commit_move(&self, coord: Coord) -> MoveCommit {
        create_move_commit(&self.signing_key, &self.identity, coord)
    }

    pub async fn send_move_commit_to_nodes(&self, commit: MoveCommit) -> Result<()> {
        let message = self.outbox.message(MessageKind::MoveCommit).with_move_commit(commit);
        self.outbox.send(Recipient::All, &message).await
    }

    /// Reveal a committed move.
    ///
    /// Lockstep moves are checked by every peer against the commitment, so
    /// they bypass the quorum tracker and are applied locally at once.
    pub async fn reveal_move(&self, coord: Coord) -> Result<()> {
        self.validator.check_move(coord)?;
        let message = self
            .outbox
            .message(MessageKind::Move)
            .with_coord(coord)
            .with_seq(self.next_sequence());
        self.outbox.send(Recipient::All, &message).await?;
        self.game_state
            .write()
            .await
            .player_locs
            .insert(self.identity.clone(), coord);
        Ok(())
    }

    pub async fn send_ack(&self, identifier: &str, seq: u64) -> Result<()> {
        self.outbox.send_ack(identifier, seq).await
    }

    /// Announce capturing the prey at `coord`, claiming one more point.
    pub async fn send_capture_to_nodes(&self, coord: Coord) -> Result<()> {
        let score = {
            let state = self.game_state.read().await;
            if state.prey_location() != Some(coord) {
                return Err(Error::InvalidPreyCapture(format!("prey is not at {coord}")));
            }
            state.score_of(&self.identity) + 1
        };

        let message = self
            .outbox
            .message(MessageKind::Captured)
            .with_coord(coord)
            .with_score(score);
        self.outbox.send(Recipient::All, &message).await?;

        self.game_state
            .write()
            .await
            .player_scores
            .insert(self.identity.clone(), score);
        info!(score, %coord, "capture announced");
        Ok(())
    }

    /// Ask `identifier`, already in the roster, to add us back.
    pub async fn initiate_connection(&self, identifier: &str) -> Result<()> {
        let message = self.outbox.message(MessageKind::Connect);
        self.outbox.send(Recipient::peer(identifier), &message).await
    }

    /// Fetch the peer list and connect to everyone on it.
    ///
    /// Returns how many peers were contacted. Peers whose address does not
    /// resolve are skipped.
    pub async fn join_mesh(&self, directory: &DirectoryClient) -> Result<usize> {
        let nodes = directory.get_nodes().await?;
        let mut contacted = 0;
        for (identifier, addr) in nodes {
            if identifier == self.identity {
                continue;
            }
            let addr = match resolve(&addr).await {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(peer = %identifier, "skipping peer with bad address: {e:#}");
                    continue;
                }
            };
            self.roster()
                .add(PeerEndpoint::new(identifier.clone(), addr, self.transport.clone()))
                .await?;
            self.initiate_connection(&identifier).await?;
            contacted += 1;
        }
        info!(peers = contacted, "joined mesh");
        Ok(contacted)
    }
}

impl std::fmt::Debug for NodeComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeComm")
            .field("identity", &self.identity)
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}
