//! Grid geometry
//!
//! Manhattan distance is the only metric in the task. Everything here is pure;
//! the one function that consults the grid (`legal_step`) only reads it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::grid::GridState;
use crate::error::MoveRejection;

// ============================================================================
// Position / Delta
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub row: i32,
    pub col: i32,
}

impl Position {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub fn in_bounds(&self, size: usize) -> bool {
        let n = size as i32;
        self.row >= 0 && self.row < n && self.col >= 0 && self.col < n
    }

    /// Row-major cell index, `None` outside the grid.
    pub fn cell_index(&self, size: usize) -> Option<usize> {
        if self.in_bounds(size) {
            Some(self.row as usize * size + self.col as usize)
        } else {
            None
        }
    }

    pub fn from_cell_index(index: usize, size: usize) -> Self {
        Self::new((index / size) as i32, (index % size) as i32)
    }
}

impl From<(i32, i32)> for Position {
    fn from((row, col): (i32, i32)) -> Self {
        Self::new(row, col)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delta {
    pub dr: i32,
    pub dc: i32,
}

impl Delta {
    pub const ZERO: Delta = Delta { dr: 0, dc: 0 };

    pub const fn new(dr: i32, dc: i32) -> Self {
        Self { dr, dc }
    }

    pub fn is_zero(&self) -> bool {
        self.dr == 0 && self.dc == 0
    }
}

// ============================================================================
// Direction
// ============================================================================

/// Discrete move. Index order (Up, Down, Left, Right) is also the action
/// ordering used by the joint policy tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Left, Direction::Right];

    pub fn delta(self) -> Delta {
        match self {
            Direction::Up => Delta::new(-1, 0),
            Direction::Down => Delta::new(1, 0),
            Direction::Left => Delta::new(0, -1),
            Direction::Right => Delta::new(0, 1),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Direction> {
        Self::ALL.get(index).copied()
    }

    pub fn from_delta(delta: Delta) -> Option<Direction> {
        Self::ALL.into_iter().find(|d| d.delta() == delta)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl FromStr for Direction {
    type Err = MoveRejection;

    /// Accepts plain names and browser key names (`ArrowUp`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.strip_prefix("arrow").unwrap_or(lower.as_str()) {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            _ => Err(MoveRejection::InvalidDirection),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Players / Goals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerId {
    Player1,
    Player2,
}

impl PlayerId {
    pub const BOTH: [PlayerId; 2] = [PlayerId::Player1, PlayerId::Player2];

    /// Slot index 0/1 used by buffers and occupancy arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<PlayerId> {
        Self::BOTH.get(index).copied()
    }

    pub fn other(self) -> PlayerId {
        match self {
            PlayerId::Player1 => PlayerId::Player2,
            PlayerId::Player2 => PlayerId::Player1,
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerId::Player1 => f.write_str("player1"),
            PlayerId::Player2 => f.write_str("player2"),
        }
    }
}

/// A goal cell with its creation-order index. The index never changes during a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Goal {
    pub index: usize,
    pub pos: Position,
}

impl Goal {
    pub const fn new(index: usize, pos: Position) -> Self {
        Self { index, pos }
    }
}

// ============================================================================
// Functions
// ============================================================================

pub fn distance(a: Position, b: Position) -> u32 {
    a.row.abs_diff(b.row) + a.col.abs_diff(b.col)
}

/// `pos + delta`, no bounds check.
pub fn step(pos: Position, delta: Delta) -> Position {
    Position::new(pos.row + delta.dr, pos.col + delta.dc)
}

/// The delta itself when the destination is inside the grid and not an
/// obstacle, otherwise [`Delta::ZERO`] (a bump).
pub fn legal_step(grid: &GridState, pos: Position, delta: Delta) -> Delta {
    let dest = step(pos, delta);
    if grid.in_bounds(dest) && !grid.is_obstacle(dest) {
        delta
    } else {
        Delta::ZERO
    }
}

pub fn at_goal(pos: Position, goals: &[Goal]) -> bool {
    goals.iter().any(|g| g.pos == pos)
}

/// Index of the goal at `pos`, if any.
pub fn which_goal(pos: Position, goals: &[Goal]) -> Option<usize> {
    goals.iter().find(|g| g.pos == pos).map(|g| g.index)
}

/// Nearest goal to `pos`; equal distances resolve to the lowest goal index.
pub fn nearest_goal(pos: Position, goals: &[Goal]) -> Option<&Goal> {
    goals.iter().min_by_key(|g| (distance(pos, g.pos), g.index))
}

/// Goal nearest to the projected point `pos + delta`.
///
/// A zero delta yields `None`. When several goals tie for nearest, the most
/// recent entry of `history` is returned as-is (which may itself be `None`),
/// so a player walking along a bisector keeps their previous intent.
pub fn infer_intended_goal(
    pos: Position,
    delta: Delta,
    goals: &[Goal],
    history: &[Option<usize>],
) -> Option<usize> {
    if delta.is_zero() || goals.is_empty() {
        return None;
    }

    let projected = step(pos, delta);
    let min_dist = goals.iter().map(|g| distance(projected, g.pos)).min()?;
    let mut nearest = goals.iter().filter(|g| distance(projected, g.pos) == min_dist);

    match (nearest.next(), nearest.next()) {
        (Some(only), None) => Some(only.index),
        _ => history.last().copied().flatten(),
    }
}
