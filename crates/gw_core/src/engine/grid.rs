//! N×N grid: static terrain plus the two player occupants.
//!
//! Terrain (goal/obstacle) and occupancy are stored separately so both players
//! can stand on the same goal cell; [`GridState::label`] reports the occupant
//! first, matching what a renderer draws on top.

use serde::{Deserialize, Serialize};

use super::geometry::{PlayerId, Position};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Empty,
    HumanOccupied,
    AgentOccupied,
    Goal,
    Obstacle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terrain {
    Open,
    Goal,
    Obstacle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridState {
    size: usize,
    terrain: Vec<Terrain>,
    occupants: [Option<Position>; 2],
}

impl GridState {
    pub fn new(size: usize) -> Self {
        Self { size, terrain: vec![Terrain::Open; size * size], occupants: [None, None] }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.in_bounds(self.size)
    }

    fn terrain_at(&self, pos: Position) -> Option<Terrain> {
        pos.cell_index(self.size).map(|i| self.terrain[i])
    }

    pub fn is_obstacle(&self, pos: Position) -> bool {
        self.terrain_at(pos) == Some(Terrain::Obstacle)
    }

    pub fn is_goal_cell(&self, pos: Position) -> bool {
        self.terrain_at(pos) == Some(Terrain::Goal)
    }

    pub fn is_occupied(&self, pos: Position) -> bool {
        self.occupants.iter().any(|o| *o == Some(pos))
    }

    /// In bounds, open terrain and nobody standing on it.
    pub fn is_free(&self, pos: Position) -> bool {
        self.terrain_at(pos) == Some(Terrain::Open) && !self.is_occupied(pos)
    }

    pub fn place_goal(&mut self, pos: Position) -> Result<()> {
        if !self.is_free(pos) {
            return Err(CoreError::InvalidGoal(pos));
        }
        self.set_terrain(pos, Terrain::Goal);
        Ok(())
    }

    pub fn place_obstacle(&mut self, pos: Position) -> Result<()> {
        if !self.is_free(pos) {
            return Err(CoreError::InvalidDesign(format!("obstacle cell {pos} is not free")));
        }
        self.set_terrain(pos, Terrain::Obstacle);
        Ok(())
    }

    fn set_terrain(&mut self, pos: Position, terrain: Terrain) {
        if let Some(i) = pos.cell_index(self.size) {
            self.terrain[i] = terrain;
        }
    }

    /// Moves (or first places) a player. The previous cell is released.
    pub fn set_player(&mut self, player: PlayerId, pos: Position) -> Result<()> {
        if !self.in_bounds(pos) || self.is_obstacle(pos) {
            return Err(CoreError::InvalidDesign(format!("{player} cannot stand on {pos}")));
        }
        self.occupants[player.index()] = Some(pos);
        Ok(())
    }

    /// Occupancy update for a destination already vetted by `legal_step`.
    pub(crate) fn relocate(&mut self, player: PlayerId, pos: Position) {
        self.occupants[player.index()] = Some(pos);
    }

    pub fn occupant(&self, player: PlayerId) -> Option<Position> {
        self.occupants[player.index()]
    }

    pub fn label(&self, pos: Position) -> CellKind {
        if self.occupants[PlayerId::Player1.index()] == Some(pos) {
            return CellKind::HumanOccupied;
        }
        if self.occupants[PlayerId::Player2.index()] == Some(pos) {
            return CellKind::AgentOccupied;
        }
        match self.terrain_at(pos) {
            Some(Terrain::Goal) => CellKind::Goal,
            Some(Terrain::Obstacle) => CellKind::Obstacle,
            _ => CellKind::Empty,
        }
    }

    pub fn obstacles(&self) -> Vec<Position> {
        self.terrain
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == Terrain::Obstacle)
            .map(|(i, _)| Position::from_cell_index(i, self.size))
            .collect()
    }

    /// Row-major labels, for renderers and snapshots.
    pub fn rows(&self) -> Vec<Vec<CellKind>> {
        let n = self.size as i32;
        (0..n).map(|r| (0..n).map(|c| self.label(Position::new(r, c))).collect()).collect()
    }
}
