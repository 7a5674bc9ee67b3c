//! Trial state owned by [`super::TrialMachine`].

use serde::{Deserialize, Serialize};

use super::design::ExperimentType;
use crate::engine::geometry::{Direction, Goal, PlayerId, Position};
use crate::engine::grid::GridState;
use crate::engine::placement::GoalCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPhase {
    Initialized,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    /// Single-player trial: player 1 reached a goal.
    Reached,
    /// Both players ended on the same goal.
    Collaborated,
    /// Both players reached goals, but different ones.
    Diverged,
    /// Step budget ran out first.
    StepBudgetExhausted,
    /// Wall-clock limit hit (external game timeout).
    TimedOut,
}

impl TrialOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, TrialOutcome::Reached | TrialOutcome::Collaborated)
    }
}

/// Per-player histories. `trajectory[i]` is the position before `actions[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTrack {
    pub trajectory: Vec<Position>,
    pub actions: Vec<Direction>,
    pub reaction_ms: Vec<u64>,
    pub intents: Vec<Option<usize>>,
    pub first_detected_goal: Option<usize>,
    /// First write wins.
    pub goal_reached_step: Option<u32>,
    pub final_reached_goal: Option<usize>,
}

impl PlayerTrack {
    pub fn latest_intent(&self) -> Option<usize> {
        self.intents.last().copied().flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGoalRecord {
    pub goal_index: usize,
    pub position: Position,
    pub condition: GoalCondition,
    /// Step count when the goal appeared.
    pub step: u32,
    pub relaxed: bool,
    pub distance_to_player1: u32,
    pub distance_to_player2: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TrialState {
    pub trial_index: u32,
    pub experiment: ExperimentType,
    pub grid: GridState,
    pub player1: Position,
    pub player2: Option<Position>,
    pub goals: Vec<Goal>,
    pub step_count: u32,
    pub max_steps: u32,
    pub tracks: [PlayerTrack; 2],
    pub condition: GoalCondition,
    pub new_goal_presented: bool,
    pub new_goal: Option<NewGoalRecord>,
    /// Latched on the first trigger, even when no goal could be placed.
    pub injection_attempted: bool,
    pub first_detected_shared_goal: Option<usize>,
    pub collaboration_succeeded: Option<bool>,
    pub phase: TrialPhase,
    pub outcome: Option<TrialOutcome>,
    /// Bumped on every accepted mutation.
    pub revision: u64,
    pub started_at_ms: Option<u64>,
    pub last_input_ms: [Option<u64>; 2],
}

impl TrialState {
    pub fn position(&self, player: PlayerId) -> Option<Position> {
        match player {
            PlayerId::Player1 => Some(self.player1),
            PlayerId::Player2 => self.player2,
        }
    }

    pub(crate) fn set_position(&mut self, player: PlayerId, pos: Position) {
        match player {
            PlayerId::Player1 => self.player1 = pos,
            PlayerId::Player2 => self.player2 = Some(pos),
        }
    }

    pub fn track(&self, player: PlayerId) -> &PlayerTrack {
        &self.tracks[player.index()]
    }

    pub fn is_at_goal(&self, player: PlayerId) -> bool {
        self.position(player)
            .map_or(false, |p| self.goals.iter().any(|g| g.pos == p))
    }
}
