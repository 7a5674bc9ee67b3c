//! Trial designs: where players and goals start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::engine::geometry::Position;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentType {
    #[serde(rename = "1P1G")]
    OneP1G,
    #[serde(rename = "1P2G")]
    OneP2G,
    #[serde(rename = "2P2G")]
    TwoP2G,
    #[serde(rename = "2P3G")]
    TwoP3G,
}

impl ExperimentType {
    pub fn is_two_player(self) -> bool {
        matches!(self, ExperimentType::TwoP2G | ExperimentType::TwoP3G)
    }

    /// Variants in which a third goal can appear mid-trial.
    pub fn injects_goal(self) -> bool {
        matches!(self, ExperimentType::OneP2G | ExperimentType::TwoP3G)
    }

    pub fn seed_goal_count(self) -> usize {
        match self {
            ExperimentType::OneP1G => 1,
            _ => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentType::OneP1G => "1P1G",
            ExperimentType::OneP2G => "1P2G",
            ExperimentType::TwoP2G => "2P2G",
            ExperimentType::TwoP3G => "2P3G",
        }
    }
}

impl fmt::Display for ExperimentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1P1G" => Ok(ExperimentType::OneP1G),
            "1P2G" => Ok(ExperimentType::OneP2G),
            "2P2G" => Ok(ExperimentType::TwoP2G),
            "2P3G" => Ok(ExperimentType::TwoP3G),
            other => Err(CoreError::InvalidDesign(format!("unknown experiment type '{other}'"))),
        }
    }
}

/// Initial layout of one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialDesign {
    pub experiment: ExperimentType,
    pub player1: Position,
    #[serde(default)]
    pub player2: Option<Position>,
    pub goals: Vec<Position>,
    #[serde(default)]
    pub obstacles: Vec<Position>,
}

impl TrialDesign {
    /// Built-in layouts used when no map file is supplied.
    pub fn fallback(experiment: ExperimentType) -> Self {
        let (player1, player2, goals) = match experiment {
            ExperimentType::OneP1G => (Position::new(7, 2), None, vec![Position::new(7, 12)]),
            ExperimentType::OneP2G => {
                (Position::new(7, 7), None, vec![Position::new(2, 7), Position::new(12, 7)])
            }
            ExperimentType::TwoP2G | ExperimentType::TwoP3G => (
                Position::new(7, 2),
                Some(Position::new(7, 12)),
                vec![Position::new(2, 7), Position::new(12, 7)],
            ),
        };
        Self { experiment, player1, player2, goals, obstacles: Vec::new() }
    }

    pub fn validate(&self, size: usize) -> Result<()> {
        let bad = |msg: String| -> Result<()> { Err(CoreError::InvalidDesign(msg)) };

        if self.goals.is_empty() || self.goals.len() > 2 {
            return bad(format!("{} seed goals given, expected 1 or 2", self.goals.len()));
        }
        match (self.experiment.is_two_player(), self.player2) {
            (true, None) => return bad(format!("{} needs a second player", self.experiment)),
            (false, Some(_)) => return bad(format!("{} is single-player", self.experiment)),
            _ => {}
        }

        let players: Vec<Position> = std::iter::once(self.player1).chain(self.player2).collect();
        for cell in players.iter().chain(&self.goals).chain(&self.obstacles) {
            if !cell.in_bounds(size) {
                return bad(format!("{cell} lies outside the {size}x{size} grid"));
            }
        }
        if self.player2 == Some(self.player1) {
            return bad(format!("both players start on {}", self.player1));
        }
        for (i, goal) in self.goals.iter().enumerate() {
            if self.goals[..i].contains(goal) {
                return bad(format!("two goals share {goal}"));
            }
            if players.contains(goal) {
                return bad(format!("goal {goal} coincides with a player"));
            }
            if self.obstacles.contains(goal) {
                return bad(format!("goal {goal} coincides with an obstacle"));
            }
        }
        if let Some(o) = self.obstacles.iter().find(|o| players.contains(*o)) {
            return bad(format!("obstacle {o} coincides with a player"));
        }
        Ok(())
    }
}
