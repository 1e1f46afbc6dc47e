//! The single message type exchanged between logic nodes.

use serde::{Deserialize, Serialize};

use crate::types::{Coord, GameState, MoveCommit};

/// Discriminant of a [`NodeMessage`].
///
/// Encoded as a snake_case string. Kinds this build does not know decode to
/// [`MessageKind::Unknown`] so the dispatcher can log and drop them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Full game-state snapshot.
    GameState,
    /// Hash commitment to an upcoming move (lockstep).
    MoveCommit,
    /// A revealed move.
    Move,
    /// Handshake request: "add me to your roster".
    Connect,
    /// Handshake completion.
    Connected,
    /// Acknowledgement of a move sequence number.
    Ack,
    /// Claim of having captured the prey.
    Captured,
    /// Anything else.
    Unknown(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::GameState => "game_state",
            Self::MoveCommit => "move_commit",
            Self::Move => "move",
            Self::Connect => "connect",
            Self::Connected => "connected",
            Self::Ack => "ack",
            Self::Captured => "captured",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "game_state" => Self::GameState,
            "move_commit" => Self::MoveCommit,
            "move" => Self::Move,
            "connect" => Self::Connect,
            "connected" => Self::Connected,
            "ack" => Self::Ack,
            "captured" => Self::Captured,
            _ => Self::Unknown(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent for all node-to-node communication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMessage {
    /// Identifier of the sending node.
    pub identifier: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<GameState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coord: Option<Coord>,
    /// Sequence number of a move, echoed back by acks.
    #[serde(default)]
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_commit: Option<MoveCommit>,
    /// Claimed score on a capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    /// Address the sender listens on.
    #[serde(default)]
    pub addr: String,
}

impl NodeMessage {
    pub fn new(kind: MessageKind, identifier: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            game_state: None,
            coord: None,
            seq: 0,
            move_commit: None,
            score: None,
            addr: addr.into(),
        }
    }

    #[must_use]
    pub fn with_coord(mut self, coord: Coord) -> Self {
        self.coord = Some(coord);
        self
    }

    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    #[must_use]
    pub fn with_game_state(mut self, state: GameState) -> Self {
        self.game_state = Some(state);
        self
    }

    #[must_use]
    pub fn with_move_commit(mut self, commit: MoveCommit) -> Self {
        self.move_commit = Some(commit);
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: u32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Destination of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Every peer currently in the roster.
    All,
    /// One peer, by identifier.
    Peer(String),
}

impl Recipient {
    pub fn peer(identifier: impl Into<String>) -> Self {
        Self::Peer(identifier.into())
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Peer(id) => f.write_str(id),
        }
    }
}
