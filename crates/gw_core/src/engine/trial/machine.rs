//! # Trial State Machine
//!
//! `Initialized → Running → Completed`, one instance per trial. All writes to
//! [`TrialState`] go through the methods here; everybody else reads
//! [`TrialSnapshot`] copies.
//!
//! ## Moves
//! - `apply_move`: one player, step counter +1
//! - `apply_synchronized_moves`: both players against the same pre-move
//!   positions, step counter +1 once
//!
//! A move is guarded by a [`MoveTicket`]: while a player holds one, no other
//! move for that player (and no synchronized turn) is accepted.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::design::{ExperimentType, TrialDesign};
use super::snapshot::{CompletionVerdict, TrialSnapshot};
use super::state::{NewGoalRecord, PlayerTrack, TrialOutcome, TrialPhase, TrialState};
use crate::engine::config::GridConfig;
use crate::engine::geometry::{
    distance, infer_intended_goal, legal_step, step, which_goal, Direction, Goal, PlayerId, Position,
};
use crate::engine::grid::GridState;
use crate::engine::placement::{GoalCondition, GoalPlacer, PlacementRequest};
use crate::error::{CoreError, MoveRejection, Result};

/// Exclusive right to move one player. Not `Clone`; consumed by
/// [`TrialMachine::commit_move`] or [`TrialMachine::cancel_move`].
#[derive(Debug)]
#[must_use = "an outstanding ticket blocks further moves for this player"]
pub struct MoveTicket {
    player: PlayerId,
    trial_index: u32,
}

impl MoveTicket {
    pub fn player(&self) -> PlayerId {
        self.player
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEffect {
    pub player: PlayerId,
    pub direction: Direction,
    pub from: Position,
    pub to: Position,
    /// Wall or obstacle; position unchanged but the action is recorded.
    pub bumped: bool,
    pub intent: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub effects: Vec<MoveEffect>,
    pub step_count: u32,
    pub verdict: CompletionVerdict,
}

#[derive(Debug, Clone)]
pub struct TrialMachine {
    state: TrialState,
    in_flight: [bool; 2],
}

impl TrialMachine {
    pub fn new(
        trial_index: u32,
        design: &TrialDesign,
        grid_config: &GridConfig,
        condition: GoalCondition,
    ) -> Result<Self> {
        design.validate(grid_config.size)?;

        let mut grid = GridState::new(grid_config.size);
        for o in &design.obstacles {
            grid.place_obstacle(*o)?;
        }
        grid.set_player(PlayerId::Player1, design.player1)?;
        if let Some(p2) = design.player2 {
            grid.set_player(PlayerId::Player2, p2)?;
        }
        let mut goals = Vec::with_capacity(design.goals.len() + 1);
        for (index, pos) in design.goals.iter().enumerate() {
            grid.place_goal(*pos)?;
            goals.push(Goal::new(index, *pos));
        }

        Ok(Self {
            state: TrialState {
                trial_index,
                experiment: design.experiment,
                grid,
                player1: design.player1,
                player2: design.player2,
                goals,
                step_count: 0,
                max_steps: grid_config.max_game_length,
                tracks: [PlayerTrack::default(), PlayerTrack::default()],
                condition,
                new_goal_presented: false,
                new_goal: None,
                injection_attempted: false,
                first_detected_shared_goal: None,
                collaboration_succeeded: None,
                phase: TrialPhase::Initialized,
                outcome: None,
                revision: 0,
                started_at_ms: None,
                last_input_ms: [None, None],
            },
            in_flight: [false, false],
        })
    }

    pub fn from_snapshot(snapshot: &TrialSnapshot) -> Result<Self> {
        Ok(Self { state: snapshot.restore()?, in_flight: [false, false] })
    }

    pub fn state(&self) -> &TrialState {
        &self.state
    }

    pub fn phase(&self) -> TrialPhase {
        self.state.phase
    }

    pub fn trial_index(&self) -> u32 {
        self.state.trial_index
    }

    pub fn experiment(&self) -> ExperimentType {
        self.state.experiment
    }

    pub fn revision(&self) -> u64 {
        self.state.revision
    }

    pub fn snapshot(&self) -> TrialSnapshot {
        TrialSnapshot::capture(&self.state)
    }

    pub fn check_completion(&self) -> CompletionVerdict {
        self.state.completion_verdict()
    }

    pub fn is_in_flight(&self, player: PlayerId) -> bool {
        self.in_flight[player.index()]
    }

    /// Returns false when the trial was already started.
    pub fn start(&mut self, at_ms: u64) -> bool {
        if self.state.phase != TrialPhase::Initialized {
            return false;
        }
        self.state.phase = TrialPhase::Running;
        self.state.started_at_ms = Some(at_ms);
        self.state.revision += 1;
        info!(
            trial = self.state.trial_index,
            experiment = %self.state.experiment,
            condition = %self.state.condition,
            "trial started"
        );
        true
    }

    // ========================================================================
    // Single moves
    // ========================================================================

    fn check_movable(&self, player: PlayerId) -> std::result::Result<(), MoveRejection> {
        if self.state.phase != TrialPhase::Running {
            return Err(MoveRejection::NotRunning);
        }
        if self.state.position(player).is_none() {
            return Err(MoveRejection::UnknownPlayer(player));
        }
        if self.state.is_at_goal(player) {
            return Err(MoveRejection::AlreadyAtGoal(player));
        }
        Ok(())
    }

    pub fn begin_move(&mut self, player: PlayerId) -> std::result::Result<MoveTicket, MoveRejection> {
        self.check_movable(player)?;
        if self.in_flight[player.index()] {
            return Err(MoveRejection::Busy(player));
        }
        self.in_flight[player.index()] = true;
        Ok(MoveTicket { player, trial_index: self.state.trial_index })
    }

    pub fn cancel_move(&mut self, ticket: MoveTicket) {
        if ticket.trial_index == self.state.trial_index {
            self.in_flight[ticket.player.index()] = false;
        }
    }

    pub fn commit_move(
        &mut self,
        ticket: MoveTicket,
        direction: Direction,
        at_ms: u64,
    ) -> std::result::Result<MoveOutcome, MoveRejection> {
        let player = ticket.player;
        self.cancel_move(ticket);
        self.check_movable(player)?;

        let from = self.state.position(player).ok_or(MoveRejection::UnknownPlayer(player))?;
        let effect = self.apply_one(player, from, direction, at_ms);
        Ok(self.finish_step(vec![effect]))
    }

    pub fn apply_move(
        &mut self,
        player: PlayerId,
        direction: Direction,
        at_ms: u64,
    ) -> std::result::Result<MoveOutcome, MoveRejection> {
        let ticket = self.begin_move(player)?;
        self.commit_move(ticket, direction, at_ms)
    }

    // ========================================================================
    // Synchronized turns
    // ========================================================================

    /// Applies both proposals against the positions before either move. A
    /// player already on a goal sits the turn out. Fails only when nothing
    /// could be applied.
    pub fn apply_synchronized_moves(
        &mut self,
        dir1: Option<Direction>,
        dir2: Option<Direction>,
        at_ms: u64,
    ) -> std::result::Result<MoveOutcome, MoveRejection> {
        if self.state.phase != TrialPhase::Running {
            return Err(MoveRejection::NotRunning);
        }
        if let Some(p) = PlayerId::BOTH.into_iter().find(|p| self.in_flight[p.index()]) {
            return Err(MoveRejection::Busy(p));
        }

        let before = [Some(self.state.player1), self.state.player2];
        let mut planned = Vec::with_capacity(2);
        let mut first_rejection = None;

        for (player, dir) in PlayerId::BOTH.into_iter().zip([dir1, dir2]) {
            let Some(dir) = dir else { continue };
            match (before[player.index()], self.check_movable(player)) {
                (Some(from), Ok(())) => planned.push((player, from, dir)),
                (None, _) => {
                    first_rejection.get_or_insert(MoveRejection::UnknownPlayer(player));
                }
                (_, Err(reason)) => {
                    first_rejection.get_or_insert(reason);
                }
            }
        }

        if planned.is_empty() {
            return Err(first_rejection.unwrap_or(MoveRejection::InvalidDirection));
        }

        let effects = planned
            .into_iter()
            .map(|(player, from, dir)| self.apply_one(player, from, dir, at_ms))
            .collect();
        Ok(self.finish_step(effects))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn apply_one(&mut self, player: PlayerId, from: Position, direction: Direction, at_ms: u64) -> MoveEffect {
        let delta = legal_step(&self.state.grid, from, direction.delta());
        let to = step(from, delta);

        self.state.grid.relocate(player, to);
        self.state.set_position(player, to);

        let since = self.state.last_input_ms[player.index()]
            .or(self.state.started_at_ms)
            .unwrap_or(at_ms);
        self.state.last_input_ms[player.index()] = Some(at_ms);

        // Intent is projected from the post-move cell along the attempted direction.
        let goals = &self.state.goals;
        let track = &mut self.state.tracks[player.index()];
        let intent = infer_intended_goal(to, direction.delta(), goals, &track.intents);

        track.trajectory.push(from);
        track.actions.push(direction);
        track.reaction_ms.push(at_ms.saturating_sub(since));
        track.intents.push(intent);
        if track.first_detected_goal.is_none() {
            track.first_detected_goal = intent;
        }

        debug!(
            trial = self.state.trial_index,
            %player,
            %direction,
            from = %from,
            to = %to,
            intent = ?intent,
            "move applied"
        );

        MoveEffect { player, direction, from, to, bumped: delta.is_zero(), intent }
    }

    fn finish_step(&mut self, effects: Vec<MoveEffect>) -> MoveOutcome {
        self.state.step_count += 1;
        self.state.revision += 1;

        if self.state.experiment.is_two_player() && self.state.first_detected_shared_goal.is_none() {
            let i1 = self.state.tracks[0].latest_intent();
            let i2 = self.state.tracks[1].latest_intent();
            if i1.is_some() && i1 == i2 {
                self.state.first_detected_shared_goal = i1;
            }
        }

        for player in PlayerId::BOTH {
            let Some(pos) = self.state.position(player) else { continue };
            let reached = which_goal(pos, &self.state.goals);
            let track = &mut self.state.tracks[player.index()];
            if reached.is_some() && track.goal_reached_step.is_none() {
                track.goal_reached_step = Some(self.state.step_count);
                track.final_reached_goal = reached;
            }
        }

        let verdict = self.state.completion_verdict();
        if let CompletionVerdict::Completed(outcome) = verdict {
            self.complete(outcome);
        }

        MoveOutcome { effects, step_count: self.state.step_count, verdict }
    }

    fn complete(&mut self, outcome: TrialOutcome) {
        self.state.phase = TrialPhase::Completed;
        self.state.outcome = Some(outcome);
        if self.state.experiment.is_two_player() {
            self.state.collaboration_succeeded = Some(outcome == TrialOutcome::Collaborated);
        }
        self.state.revision += 1;
        info!(
            trial = self.state.trial_index,
            ?outcome,
            steps = self.state.step_count,
            "trial completed"
        );
    }

    /// External wall-clock limit. Returns false if the trial is not running.
    pub fn expire(&mut self) -> bool {
        if self.state.phase != TrialPhase::Running {
            return false;
        }
        warn!(trial = self.state.trial_index, steps = self.state.step_count, "trial timed out");
        self.complete(TrialOutcome::TimedOut);
        true
    }

    // ========================================================================
    // Goal injection
    // ========================================================================

    /// Goal index whose convergence should trigger injection, if any.
    ///
    /// Two players: both latest intents point at the same goal. Solo: exactly
    /// two goals on the board and player 1 has a current intent.
    pub fn shared_goal_trigger(&self) -> Option<usize> {
        let s = &self.state;
        match s.experiment {
            ExperimentType::TwoP3G => {
                let i1 = s.tracks[0].latest_intent()?;
                let i2 = s.tracks[1].latest_intent()?;
                (i1 == i2).then_some(i1)
            }
            ExperimentType::OneP2G if s.goals.len() == 2 => s.tracks[0].latest_intent(),
            _ => None,
        }
    }

    /// Runs the trigger check and, the first time it fires, asks `placer` for
    /// a new goal. The placer is consulted at most once per trial no matter
    /// how many ticks call this.
    pub fn evaluate_new_goal(&mut self, placer: &dyn GoalPlacer, rng: &mut dyn RngCore) -> Option<NewGoalRecord> {
        let s = &self.state;
        if s.phase != TrialPhase::Running
            || !s.experiment.injects_goal()
            || s.injection_attempted
            || s.new_goal_presented
            || s.step_count < placer.min_steps_before_new_goal()
        {
            return None;
        }

        let old_index = self.shared_goal_trigger()?;
        // Solo placement is measured against the first goal, whichever goal
        // the player is heading for.
        let reference = match self.state.condition {
            GoalCondition::Solo(_) => self.state.goals.first(),
            GoalCondition::Pair(_) => self.state.goals.iter().find(|g| g.index == old_index),
        };
        let old_goal = reference?.pos;
        self.state.injection_attempted = true;
        self.state.revision += 1;

        let condition = self.state.condition;
        if condition.is_no_op() {
            info!(trial = self.state.trial_index, %condition, "shared goal detected, no new goal");
            return None;
        }

        let placement = {
            let request = PlacementRequest {
                grid: &self.state.grid,
                player1: self.state.player1,
                player2: self.state.player2,
                goals: &self.state.goals,
                old_goal,
                condition,
            };
            placer.place(&request, rng)
        };

        let Some(placement) = placement else {
            let err = CoreError::GoalPlacementExhausted { condition };
            warn!(trial = self.state.trial_index, %err, "goal injection skipped");
            return None;
        };

        match self.inject(placement.position, placement.relaxed) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(trial = self.state.trial_index, %err, "goal injection failed");
                None
            }
        }
    }

    /// Places a new goal directly. Idempotent: once a goal has been injected,
    /// further calls return that goal's index.
    pub fn inject_goal(&mut self, pos: Position) -> Result<usize> {
        self.inject(pos, false).map(|r| r.goal_index)
    }

    fn inject(&mut self, pos: Position, relaxed: bool) -> Result<NewGoalRecord> {
        if let Some(existing) = self.state.new_goal {
            debug!(trial = self.state.trial_index, "goal already injected");
            return Ok(existing);
        }
        if self.state.phase != TrialPhase::Running {
            return Err(MoveRejection::NotRunning.into());
        }
        self.state.grid.place_goal(pos)?;

        let goal_index = self.state.goals.len();
        self.state.goals.push(Goal::new(goal_index, pos));
        let record = NewGoalRecord {
            goal_index,
            position: pos,
            condition: self.state.condition,
            step: self.state.step_count,
            relaxed,
            distance_to_player1: distance(self.state.player1, pos),
            distance_to_player2: self.state.player2.map(|p2| distance(p2, pos)),
        };
        self.state.new_goal = Some(record);
        self.state.new_goal_presented = true;
        self.state.injection_attempted = true;
        self.state.revision += 1;

        info!(
            trial = self.state.trial_index,
            goal = goal_index,
            position = %pos,
            condition = %record.condition,
            relaxed,
            "new goal presented"
        );
        Ok(record)
    }

    // ========================================================================
    // Remote state
    // ========================================================================

    /// Replaces the trial with `snapshot`. Returns false when nothing changed.
    pub fn sync_from(&mut self, snapshot: &TrialSnapshot) -> Result<bool> {
        if snapshot.trial_index != self.state.trial_index {
            return Err(CoreError::ProtocolDesync(format!(
                "snapshot for trial {} applied to trial {}",
                snapshot.trial_index, self.state.trial_index
            )));
        }
        if *snapshot == self.snapshot() {
            return Ok(false);
        }
        self.state = snapshot.restore()?;
        debug!(trial = self.state.trial_index, revision = snapshot.revision, "state replaced from snapshot");
        Ok(true)
    }
}
