//! Peer Roster Actor - single owner of the peer connection table.
//!
//! Every addition, removal and outbound write goes through one control loop
//! that services exactly one queued operation at a time. Nothing else ever
//! holds a reference into the table, so a broadcast can never observe the
//! table mid-mutation.
//!
//! Queue servicing order is additions, then removals, then sends. A caller
//! that enqueues an add and then a send to the same peer will see the send
//! delivered.

use std::collections::HashMap;
use std::net::SocketAddr;

use quarry_proto::Recipient;
use quarry_transfer::TransportHandle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::RosterConfig;
use crate::error::{Error, Result};

/// A connected peer: its identifier and where its datagrams go.
#[derive(Debug, Clone)]
pub struct PeerEndpoint {
    pub identifier: String,
    pub addr: SocketAddr,
    transport: TransportHandle,
}

impl PeerEndpoint {
    pub fn new(identifier: impl Into<String>, addr: SocketAddr, transport: TransportHandle) -> Self {
        Self {
            identifier: identifier.into(),
            addr,
            transport,
        }
    }

    async fn write(&self, payload: &[u8]) -> anyhow::Result<()> {
        self.transport.send_to(self.addr, payload).await
    }
}

/// An outbound payload waiting for the roster actor.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub recipient: Recipient,
    pub payload: Vec<u8>,
}

/// Cloneable handle for queueing work onto the roster actor.
#[derive(Clone, Debug)]
pub struct RosterHandle {
    sends: mpsc::Sender<PendingMessage>,
    adds: mpsc::Sender<PeerEndpoint>,
    removes: mpsc::Sender<String>,
    queries: mpsc::Sender<oneshot::Sender<Vec<String>>>,
    members: watch::Receiver<Vec<String>>,
}

impl RosterHandle {
    /// Queue `payload` for one peer or for every peer.
    pub async fn send(&self, recipient: Recipient, payload: Vec<u8>) -> Result<()> {
        self.sends
            .send(PendingMessage { recipient, payload })
            .await
            .map_err(|_| Error::ActorClosed("roster"))
    }

    /// Queue an upsert of `endpoint`.
    pub async fn add(&self, endpoint: PeerEndpoint) -> Result<()> {
        self.adds
            .send(endpoint)
            .await
            .map_err(|_| Error::ActorClosed("roster"))
    }

    /// Queue removal of `identifier`.
    pub async fn remove(&self, identifier: impl Into<String>) -> Result<()> {
        self.removes
            .send(identifier.into())
            .await
            .map_err(|_| Error::ActorClosed("roster"))
    }

    /// Sorted peer identifiers, taken after every mutation queued so far.
    pub async fn peers(&self) -> Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.queries
            .send(tx)
            .await
            .map_err(|_| Error::ActorClosed("roster"))?;
        rx.await.map_err(|_| Error::ActorClosed("roster"))
    }

    /// Most recently published membership snapshot.
    pub fn members(&self) -> Vec<String> {
        self.members.borrow().clone()
    }

    pub fn peer_count(&self) -> usize {
        self.members.borrow().len()
    }
}

/// The roster actor. Create with [`PeerRoster::spawn`].
pub struct PeerRoster {
    peers: HashMap<String, PeerEndpoint>,
    sends: mpsc::Receiver<PendingMessage>,
    adds: mpsc::Receiver<PeerEndpoint>,
    removes: mpsc::Receiver<String>,
    queries: mpsc::Receiver<oneshot::Sender<Vec<String>>>,
    members: watch::Sender<Vec<String>>,
}

impl PeerRoster {
    /// Build the actor and its handle without starting it.
    pub fn new(config: &RosterConfig) -> (RosterHandle, Self) {
        let (sends_tx, sends) = mpsc::channel(config.send_capacity);
        let (adds_tx, adds) = mpsc::channel(config.add_capacity);
        let (removes_tx, removes) = mpsc::channel(config.remove_capacity);
        let (queries_tx, queries) = mpsc::channel(4);
        let (members, members_rx) = watch::channel(Vec::new());

        let handle = RosterHandle {
            sends: sends_tx,
            adds: adds_tx,
            removes: removes_tx,
            queries: queries_tx,
            members: members_rx,
        };
        let actor = Self {
            peers: HashMap::new(),
            sends,
            adds,
            removes,
            queries,
            members,
        };
        (handle, actor)
    }

    /// Start the actor on the current runtime.
    pub fn spawn(config: &RosterConfig) -> RosterHandle {
        let (handle, actor) = Self::new(config);
        tokio::spawn(actor.run());
        handle
    }

    /// Control loop. Runs until every handle has been dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(endpoint) = self.adds.recv() => self.add(endpoint),
                Some(identifier) = self.removes.recv() => self.remove(&identifier),
                Some(message) = self.sends.recv() => self.deliver(message).await,
                Some(reply) = self.queries.recv() => {
                    let _ = reply.send(self.sorted_identifiers());
                }
                else => break,
            }
        }
        debug!("peer roster stopped");
    }

    fn add(&mut self, endpoint: PeerEndpoint) {
        info!(peer = %endpoint.identifier, addr = %endpoint.addr, "adding peer");
        self.peers.insert(endpoint.identifier.clone(), endpoint);
        self.publish();
    }

    fn remove(&mut self, identifier: &str) {
        if self.peers.remove(identifier).is_some() {
            info!(peer = %identifier, "removed peer");
            self.publish();
        }
    }

    async fn deliver(&self, message: PendingMessage) {
        match &message.recipient {
            Recipient::All => {
                trace!(peers = self.peers.len(), bytes = message.payload.len(), "broadcast");
                for endpoint in self.peers.values() {
                    if let Err(e) = endpoint.write(&message.payload).await {
                        warn!(peer = %endpoint.identifier, "write failed: {e:#}");
                    }
                }
            }
            Recipient::Peer(identifier) => match self.peers.get(identifier) {
                Some(endpoint) => {
                    if let Err(e) = endpoint.write(&message.payload).await {
                        warn!(peer = %identifier, "write failed: {e:#}");
                    }
                }
                None => debug!(peer = %identifier, "dropping message for peer not in roster"),
            },
        }
    }

    fn sorted_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn publish(&self) {
        self.members.send_replace(self.sorted_identifiers());
    }
}
