//! Quarry Node - peer communication layer of a logic node
//!
//! Every player (and the prey) runs a logic node that is authoritative for
//! its own position. Nodes agree on the shared game state by talking to each
//! other directly over UDP; the directory server only hands out peer lists
//! and watches heartbeats.
//!
//! # Architecture
//!
//! One task per duty, talking through queues:
//!
//! - **Roster** ([`roster`]): sole owner of the peer table; fans out sends.
//! - **Quorum** ([`quorum`]): ack bookkeeping for moves this node made.
//! - **Dispatcher** ([`dispatcher`]): inbound listener and message state machine.
//! - **Directory** ([`directory`]): registration, peer discovery, heartbeat.
//!
//! ```text
//! UDP ─▶ envelope unwrap ─▶ Dispatcher ─┬─▶ game state
//!                                        ├─▶ Roster
//!                                        └─▶ Quorum
//! NodeComm::send_* ─▶ envelope wrap ─▶ Roster ─▶ UDP
//! ```
//!
//! The game state is the one structure written from two tasks (dispatcher
//! and quorum tracker) and lives behind a lock, see [`SharedGameState`].

use std::sync::Arc;

use quarry_proto::GameState;
use tokio::sync::RwLock;

pub mod commit;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod grid;
pub mod node;
pub mod outbox;
pub mod quorum;
pub mod roster;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{NodeConfig, RosterConfig};
pub use directory::{DirectoryClient, DirectoryRequest, DirectoryResponse, SessionConfig};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use grid::{GridBounds, GridError, GridSettings, MoveValidator};
pub use node::{NodeComm, NodeCommBuilder};
pub use outbox::Outbox;
pub use quorum::{QuorumHandle, QuorumTracker};
pub use roster::{PeerEndpoint, PeerRoster, RosterHandle};

/// Game state shared between the dispatcher, the quorum tracker and gameplay code.
pub type SharedGameState = Arc<RwLock<GameState>>;
