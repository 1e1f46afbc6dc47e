//! Quorum Tracker Actor - ack bookkeeping for moves this node originated.
//!
//! The tracker owns the [`AckLedger`]. A move is submitted when it is
//! broadcast; peers ack it; the tracker evaluates quorum on submission and
//! again after each backoff until the move commits or is abandoned.
//!
//! On commit the move is written into the local game state. After a grace
//! interval for stragglers, every rostered peer that never acked is treated
//! as unresponsive and evicted through the roster actor, and the ledger entry
//! is closed.

use quarry_consensus::{acks_needed, AckLedger, RetryPolicy, Verdict};
use quarry_proto::{Coord, MessageKind, Recipient};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::outbox::Outbox;
use crate::roster::RosterHandle;
use crate::SharedGameState;

/// Commands accepted by the tracker.
#[derive(Debug)]
pub enum QuorumCommand {
    /// Track a move that is being broadcast.
    Submit { seq: u64, coord: Coord },
    /// A peer acked `seq`.
    Ack {
        seq: u64,
        from: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Backoff elapsed: evaluate `seq` again.
    Recheck { seq: u64 },
    /// Grace interval after commit elapsed: evict and close.
    Finalize { seq: u64 },
    /// Read the ack set for `seq`.
    Acks {
        seq: u64,
        reply: oneshot::Sender<Option<Vec<String>>>,
    },
}

/// Cloneable handle to the quorum tracker.
#[derive(Clone, Debug)]
pub struct QuorumHandle {
    tx: mpsc::UnboundedSender<QuorumCommand>,
}

impl QuorumHandle {
    /// Start tracking move `seq`.
    pub fn submit(&self, seq: u64, coord: Coord) -> Result<()> {
        self.tx
            .send(QuorumCommand::Submit { seq, coord })
            .map_err(|_| Error::ActorClosed("quorum"))
    }

    /// Record an ack from `from` for `seq`.
    ///
    /// Fails with [`Error::UnknownSequence`] if `seq` is not being tracked.
    pub async fn handle_received_ack(&self, seq: u64, from: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QuorumCommand::Ack {
                seq,
                from: from.into(),
                reply,
            })
            .map_err(|_| Error::ActorClosed("quorum"))?;
        rx.await.map_err(|_| Error::ActorClosed("quorum"))?
    }

    /// Current ack set for `seq`, or `None` if there is no ledger entry.
    pub async fn acks(&self, seq: u64) -> Result<Option<Vec<String>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QuorumCommand::Acks { seq, reply })
            .map_err(|_| Error::ActorClosed("quorum"))?;
        rx.await.map_err(|_| Error::ActorClosed("quorum"))
    }
}

/// The quorum tracker actor. Create with [`QuorumTracker::spawn`].
pub struct QuorumTracker {
    policy: RetryPolicy,
    ledger: AckLedger,
    outbox: Outbox,
    game_state: SharedGameState,
    rx: mpsc::UnboundedReceiver<QuorumCommand>,
    timers: mpsc::WeakUnboundedSender<QuorumCommand>,
}

impl QuorumTracker {
    /// Moves are committed under the outbox's identity and re-announced
    /// through it.
    pub fn new(outbox: Outbox, policy: RetryPolicy, game_state: SharedGameState) -> (QuorumHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            policy,
            ledger: AckLedger::new(),
            outbox,
            game_state,
            rx,
            timers: tx.downgrade(),
        };
        (QuorumHandle { tx }, tracker)
    }

    pub fn spawn(outbox: Outbox, policy: RetryPolicy, game_state: SharedGameState) -> QuorumHandle {
        let (handle, tracker) = Self::new(outbox, policy, game_state);
        tokio::spawn(tracker.run());
        handle
    }

    /// Control loop. Runs until every handle has been dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
        }
        debug!("quorum tracker stopped");
    }

    fn roster(&self) -> &RosterHandle {
        self.outbox.roster()
    }

    async fn handle(&mut self, command: QuorumCommand) {
        match command {
            QuorumCommand::Submit { seq, coord } => {
                if let Err(e) = self.ledger.open(seq, coord) {
                    warn!(seq, "{}", Error::from(e));
                    return;
                }
                self.evaluate(seq).await;
            }
            QuorumCommand::Ack { seq, from, reply } => {
                let result = self
                    .ledger
                    .record_ack(seq, &from)
                    .map(|count| debug!(seq, peer = %from, acks = count, "ack recorded"))
                    .map_err(Error::from);
                let _ = reply.send(result);
            }
            QuorumCommand::Recheck { seq } => self.evaluate(seq).await,
            QuorumCommand::Finalize { seq } => self.finalize(seq).await,
            QuorumCommand::Acks { seq, reply } => {
                let _ = reply.send(self.ledger.acks(seq).map(<[String]>::to_vec));
            }
        }
    }

    async fn evaluate(&mut self, seq: u64) {
        let peer_count = self.roster().peer_count();
        let Some(verdict) = self.ledger.evaluate(seq, peer_count, &self.policy) else {
            return;
        };

        match verdict {
            Verdict::Commit => {
                let Some(coord) = self.coord_of(seq) else {
                    return;
                };
                self.game_state
                    .write()
                    .await
                    .player_locs
                    .insert(self.outbox.identity().to_string(), coord);
                info!(seq, %coord, peers = peer_count, "move reached quorum");
                self.schedule(QuorumCommand::Finalize { seq }, self.policy.grace);
            }
            Verdict::Retry { attempt, after } => {
                let acks = self.ledger.acks(seq).map_or(0, <[String]>::len);
                debug!(
                    seq,
                    attempt,
                    acks,
                    needed = acks_needed(acks, peer_count),
                    "no quorum yet"
                );
                // Attempt 1 is the evaluation made as the move first goes
                // out; only later attempts re-announce it.
                if attempt > 1 {
                    if let Some(coord) = self.coord_of(seq) {
                        self.reannounce(seq, coord).await;
                    }
                }
                self.schedule(QuorumCommand::Recheck { seq }, after);
            }
            Verdict::Abandon => {
                warn!(seq, peers = peer_count, "move abandoned without quorum");
            }
        }
    }

    fn coord_of(&self, seq: u64) -> Option<Coord> {
        self.ledger.get(seq).map(|e| e.pending.coord)
    }

    async fn reannounce(&self, seq: u64, coord: Coord) {
        let message = self
            .outbox
            .message(MessageKind::Move)
            .with_coord(coord)
            .with_seq(seq);
        if let Err(e) = self.outbox.send(Recipient::All, &message).await {
            warn!(seq, "could not re-announce move: {e}");
        }
    }

    async fn finalize(&mut self, seq: u64) {
        let members = self.roster().members();
        for peer in self.ledger.unresponsive(seq, &members) {
            info!(seq, %peer, "evicting unresponsive peer");
            if let Err(e) = self.roster().remove(peer).await {
                warn!(seq, "could not evict peer: {e}");
            }
        }
        self.ledger.close(seq);
    }

    fn schedule(&self, command: QuorumCommand, after: std::time::Duration) {
        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = timers.upgrade() {
                let _ = tx.send(command);
            }
        });
    }
}
