//! Error types for the logic node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to peers or the directory.
#[derive(Debug, Error)]
pub enum Error {
    /// Coordinate fails the grid check or the lockstep hash match.
    #[error("invalid move: {0}")]
    InvalidMove(String),

    /// Coordinate lies outside the grid.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    /// Move commit signature did not verify for the claimed player.
    #[error("incorrect player: {0}")]
    IncorrectPlayer(String),

    /// Ack for a sequence number this node is not tracking.
    #[error("unknown sequence number {0}")]
    UnknownSequence(u64),

    /// A move was submitted under a sequence number already in flight.
    #[error("sequence number {0} is already in flight")]
    DuplicateSequence(u64),

    /// Capture claimed at a coordinate the prey is not on.
    #[error("invalid prey capture: {0}")]
    InvalidPreyCapture(String),

    /// Claimed score is not exactly one more than the recorded score.
    #[error("invalid score update for {identifier}: recorded {recorded}, claimed {claimed:?}")]
    InvalidScoreUpdate {
        identifier: String,
        recorded: u32,
        claimed: Option<u32>,
    },

    /// A message is missing a field its kind requires.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Registration with the directory server failed.
    #[error("registration failed: {0}")]
    Registration(String),

    /// A directory RPC failed.
    #[error("directory error: {0}")]
    Directory(String),

    /// A directory RPC was attempted before registering.
    #[error("not registered with the directory server")]
    NotRegistered,

    /// An actor's queue is gone; the actor has stopped.
    #[error("{0} actor has stopped")]
    ActorClosed(&'static str),

    /// Wrapping or unwrapping a peer message failed.
    #[error("envelope error: {0}")]
    Envelope(#[from] quarry_proto::Error),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Transport(format!("{e:#}"))
    }
}

impl From<quarry_consensus::LedgerError> for Error {
    fn from(e: quarry_consensus::LedgerError) -> Self {
        match e {
            quarry_consensus::LedgerError::UnknownSequence(seq) => Error::UnknownSequence(seq),
            quarry_consensus::LedgerError::DuplicateSequence(seq) => Error::DuplicateSequence(seq),
        }
    }
}

impl From<crate::grid::GridError> for Error {
    fn from(e: crate::grid::GridError) -> Self {
        match e {
            crate::grid::GridError::OutOfBounds(c) => Error::OutOfBounds(c.to_string()),
            crate::grid::GridError::Blocked(c) => Error::InvalidMove(c.to_string()),
        }
    }
}
