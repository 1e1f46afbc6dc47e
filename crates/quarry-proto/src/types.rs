//! Game-level data carried on the wire.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier reserved for the prey node, the only node that plays lockstep.
pub const PREY_IDENTIFIER: &str = "prey";

/// A cell on the game grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// Replicated game state: where every player stands and what they scored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub player_locs: HashMap<String, Coord>,
    pub player_scores: HashMap<String, u32>,
}

impl GameState {
    /// Current location of the prey, if anyone has reported one.
    pub fn prey_location(&self) -> Option<Coord> {
        self.player_locs.get(PREY_IDENTIFIER).copied()
    }

    /// Recorded score for `identifier`; players nobody has scored for are at zero.
    pub fn score_of(&self, identifier: &str) -> u32 {
        self.player_scores.get(identifier).copied().unwrap_or(0)
    }
}

/// A signed hash commitment to a move that has not been revealed yet.
///
/// `r` and `s` are the two signature components and `pub_key` the signer's
/// public key, all in their text wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCommit {
    pub identifier: String,
    pub move_hash: Vec<u8>,
    pub r: String,
    pub s: String,
    pub pub_key: String,
}
