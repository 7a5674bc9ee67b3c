//! # Trial Snapshot
//!
//! Read-only copy of a trial for renderers, the wire and trial records. The
//! snapshot carries full histories, so restoring from it replaces a trial
//! wholesale and applying the same snapshot twice changes nothing.

use serde::{Deserialize, Serialize};

use super::design::ExperimentType;
use super::state::{NewGoalRecord, PlayerTrack, TrialOutcome, TrialPhase, TrialState};
use crate::engine::geometry::{at_goal, which_goal, Goal, PlayerId, Position};
use crate::engine::grid::{CellKind, GridState};
use crate::engine::placement::GoalCondition;
use crate::error::{CoreError, Result};
use crate::SNAPSHOT_SCHEMA_VERSION;

// ============================================================================
// Completion verdict
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "outcome", rename_all = "snake_case")]
pub enum CompletionVerdict {
    InProgress,
    Completed(TrialOutcome),
}

impl CompletionVerdict {
    pub fn is_complete(self) -> bool {
        matches!(self, CompletionVerdict::Completed(_))
    }

    pub fn outcome(self) -> Option<TrialOutcome> {
        match self {
            CompletionVerdict::Completed(o) => Some(o),
            CompletionVerdict::InProgress => None,
        }
    }
}

/// Completion rule shared by live trials and snapshots.
///
/// Single-player: player 1 on any goal. Two-player: both on some goal, and
/// the outcome compares final reached goals. The step budget ends anything
/// still open.
pub(crate) fn judge(
    two_player: bool,
    player1: Position,
    player2: Option<Position>,
    goals: &[Goal],
    final_goals: [Option<usize>; 2],
    step_count: u32,
    max_steps: u32,
) -> CompletionVerdict {
    let p1_at = at_goal(player1, goals);

    if !two_player {
        if p1_at {
            return CompletionVerdict::Completed(TrialOutcome::Reached);
        }
    } else if let Some(p2) = player2 {
        if p1_at && at_goal(p2, goals) {
            let g1 = final_goals[0].or_else(|| which_goal(player1, goals));
            let g2 = final_goals[1].or_else(|| which_goal(p2, goals));
            let outcome = if g1.is_some() && g1 == g2 {
                TrialOutcome::Collaborated
            } else {
                TrialOutcome::Diverged
            };
            return CompletionVerdict::Completed(outcome);
        }
    }

    if step_count >= max_steps {
        CompletionVerdict::Completed(TrialOutcome::StepBudgetExhausted)
    } else {
        CompletionVerdict::InProgress
    }
}

impl TrialState {
    pub fn completion_verdict(&self) -> CompletionVerdict {
        judge(
            self.experiment.is_two_player(),
            self.player1,
            self.player2,
            &self.goals,
            [self.tracks[0].final_reached_goal, self.tracks[1].final_reached_goal],
            self.step_count,
            self.max_steps,
        )
    }
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSnapshot {
    pub schema_version: u8,
    pub trial_index: u32,
    pub experiment: ExperimentType,
    pub grid_size: usize,
    pub max_steps: u32,
    pub player1: Position,
    pub player2: Option<Position>,
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub obstacles: Vec<Position>,
    pub step_count: u32,
    pub tracks: [PlayerTrack; 2],
    pub condition: GoalCondition,
    pub new_goal_presented: bool,
    pub new_goal: Option<NewGoalRecord>,
    pub injection_attempted: bool,
    pub first_detected_shared_goal: Option<usize>,
    pub collaboration_succeeded: Option<bool>,
    pub phase: TrialPhase,
    pub outcome: Option<TrialOutcome>,
    pub revision: u64,
    pub started_at_ms: Option<u64>,
    pub last_input_ms: [Option<u64>; 2],
    /// Rendered cell labels, row-major.
    #[serde(default)]
    pub cells: Vec<Vec<CellKind>>,
}

impl TrialSnapshot {
    pub fn capture(state: &TrialState) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            trial_index: state.trial_index,
            experiment: state.experiment,
            grid_size: state.grid.size(),
            max_steps: state.max_steps,
            player1: state.player1,
            player2: state.player2,
            goals: state.goals.clone(),
            obstacles: state.grid.obstacles(),
            step_count: state.step_count,
            tracks: state.tracks.clone(),
            condition: state.condition,
            new_goal_presented: state.new_goal_presented,
            new_goal: state.new_goal,
            injection_attempted: state.injection_attempted,
            first_detected_shared_goal: state.first_detected_shared_goal,
            collaboration_succeeded: state.collaboration_succeeded,
            phase: state.phase,
            outcome: state.outcome,
            revision: state.revision,
            started_at_ms: state.started_at_ms,
            last_input_ms: state.last_input_ms,
            cells: state.grid.rows(),
        }
    }

    /// Rebuilds a full trial state. The grid is reconstructed from goals,
    /// obstacles and positions; `cells` is ignored.
    pub fn restore(&self) -> Result<TrialState> {
        if self.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(CoreError::ProtocolDesync(format!(
                "snapshot schema {} (expected {})",
                self.schema_version, SNAPSHOT_SCHEMA_VERSION
            )));
        }

        let mut grid = GridState::new(self.grid_size);
        for o in &self.obstacles {
            grid.place_obstacle(*o)?;
        }
        for g in &self.goals {
            grid.place_goal(g.pos)?;
        }
        grid.set_player(PlayerId::Player1, self.player1)?;
        if let Some(p2) = self.player2 {
            grid.set_player(PlayerId::Player2, p2)?;
        }

        Ok(TrialState {
            trial_index: self.trial_index,
            experiment: self.experiment,
            grid,
            player1: self.player1,
            player2: self.player2,
            goals: self.goals.clone(),
            step_count: self.step_count,
            max_steps: self.max_steps,
            tracks: self.tracks.clone(),
            condition: self.condition,
            new_goal_presented: self.new_goal_presented,
            new_goal: self.new_goal,
            injection_attempted: self.injection_attempted,
            first_detected_shared_goal: self.first_detected_shared_goal,
            collaboration_succeeded: self.collaboration_succeeded,
            phase: self.phase,
            outcome: self.outcome,
            revision: self.revision,
            started_at_ms: self.started_at_ms,
            last_input_ms: self.last_input_ms,
        })
    }

    pub fn position(&self, player: PlayerId) -> Option<Position> {
        match player {
            PlayerId::Player1 => Some(self.player1),
            PlayerId::Player2 => self.player2,
        }
    }

    pub fn goal_positions(&self) -> Vec<Position> {
        self.goals.iter().map(|g| g.pos).collect()
    }

    pub fn is_at_goal(&self, player: PlayerId) -> bool {
        self.position(player).map_or(false, |p| at_goal(p, &self.goals))
    }

    pub fn check_completion(&self) -> CompletionVerdict {
        judge(
            self.experiment.is_two_player(),
            self.player1,
            self.player2,
            &self.goals,
            [self.tracks[0].final_reached_goal, self.tracks[1].final_reached_goal],
            self.step_count,
            self.max_steps,
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
