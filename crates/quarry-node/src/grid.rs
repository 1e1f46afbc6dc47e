//! Grid validity oracle.
//!
//! The communication layer only asks one question of the game geometry: can
//! a player stand on this cell? [`MoveValidator`] is that question.

use std::collections::HashSet;

use quarry_proto::Coord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a coordinate was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("{0} is outside the grid")]
    OutOfBounds(Coord),
    #[error("{0} is not a valid move")]
    Blocked(Coord),
}

/// Checks whether a coordinate is a legal place to move to.
pub trait MoveValidator: Send + Sync {
    fn check_move(&self, coord: Coord) -> Result<(), GridError>;
}

/// Grid dimensions and obstacles, as handed out by the directory server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSettings {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub walls: Vec<Coord>,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            width: 20,
            height: 20,
            walls: Vec::new(),
        }
    }
}

/// Rectangular grid `[0, width) x [0, height)` with impassable wall cells.
#[derive(Debug, Clone)]
pub struct GridBounds {
    width: i32,
    height: i32,
    walls: HashSet<Coord>,
}

impl GridBounds {
    pub fn new(settings: &GridSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            walls: settings.walls.iter().copied().collect(),
        }
    }

    pub fn is_in_bounds(&self, coord: Coord) -> bool {
        (0..self.width).contains(&coord.x) && (0..self.height).contains(&coord.y)
    }

    pub fn is_valid_move(&self, coord: Coord) -> bool {
        !self.walls.contains(&coord)
    }
}

impl MoveValidator for GridBounds {
    fn check_move(&self, coord: Coord) -> Result<(), GridError> {
        if !self.is_in_bounds(coord) {
            return Err(GridError::OutOfBounds(coord));
        }
        if !self.is_valid_move(coord) {
            return Err(GridError::Blocked(coord));
        }
        Ok(())
    }
}
