//! # Goal Placement Solver
//!
//! Chooses where a new goal appears once the shared-goal trigger fires. The
//! chosen cell satisfies an experimental distance condition relative to the
//! old goal while keeping the players' combined travel distance roughly the
//! same, so the manipulation does not stand out.
//!
//! Search order:
//! 1. Primary: every free cell inside the player-distance band that meets the
//!    condition. Uniform choice among all hits.
//! 2. Relaxed: every free cell whose distance to each player lies in the broad
//!    fallback band. Uniform choice.
//! 3. Nothing: `None`, treated by callers as a no-op for the trial.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::PlacementConfig;
use super::geometry::{distance, Goal, Position};
use super::grid::GridState;

// ============================================================================
// Conditions
// ============================================================================

/// Two-player injection conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceCondition {
    CloserToPlayer1,
    CloserToPlayer2,
    EqualToBoth,
    NoNewGoal,
}

impl DistanceCondition {
    pub const ALL: [DistanceCondition; 4] = [
        DistanceCondition::CloserToPlayer1,
        DistanceCondition::CloserToPlayer2,
        DistanceCondition::EqualToBoth,
        DistanceCondition::NoNewGoal,
    ];
}

/// Single-player (one player, two goals) injection conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoloCondition {
    CloserToPlayer1,
    FartherFromPlayer1,
    EqualToPlayer1,
    NoNewGoal,
}

impl SoloCondition {
    pub const ALL: [SoloCondition; 4] = [
        SoloCondition::CloserToPlayer1,
        SoloCondition::FartherFromPlayer1,
        SoloCondition::EqualToPlayer1,
        SoloCondition::NoNewGoal,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "variant", content = "condition", rename_all = "snake_case")]
pub enum GoalCondition {
    Pair(DistanceCondition),
    Solo(SoloCondition),
}

impl GoalCondition {
    pub fn is_no_op(self) -> bool {
        matches!(
            self,
            GoalCondition::Pair(DistanceCondition::NoNewGoal)
                | GoalCondition::Solo(SoloCondition::NoNewGoal)
        )
    }
}

impl Default for GoalCondition {
    fn default() -> Self {
        GoalCondition::Pair(DistanceCondition::NoNewGoal)
    }
}

impl fmt::Display for GoalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoalCondition::Pair(DistanceCondition::CloserToPlayer1) => "closer_to_player1",
            GoalCondition::Pair(DistanceCondition::CloserToPlayer2) => "closer_to_player2",
            GoalCondition::Pair(DistanceCondition::EqualToBoth) => "equal_to_both",
            GoalCondition::Pair(DistanceCondition::NoNewGoal) => "no_new_goal",
            GoalCondition::Solo(SoloCondition::CloserToPlayer1) => "solo_closer_to_player1",
            GoalCondition::Solo(SoloCondition::FartherFromPlayer1) => "solo_farther_from_player1",
            GoalCondition::Solo(SoloCondition::EqualToPlayer1) => "solo_equal_to_player1",
            GoalCondition::Solo(SoloCondition::NoNewGoal) => "solo_no_new_goal",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Request / Result
// ============================================================================

pub struct PlacementRequest<'a> {
    pub grid: &'a GridState,
    pub player1: Position,
    pub player2: Option<Position>,
    pub goals: &'a [Goal],
    /// The goal both players converged on; for solo conditions, the first goal.
    pub old_goal: Position,
    pub condition: GoalCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalPlacement {
    pub position: Position,
    pub condition: GoalCondition,
    pub distance_to_player1: u32,
    pub distance_to_player2: Option<u32>,
    pub distance_sum: u32,
    /// Found by the relaxed search rather than the primary one.
    pub relaxed: bool,
}

/// Anything that can pick a new goal cell.
pub trait GoalPlacer {
    fn place(&self, request: &PlacementRequest<'_>, rng: &mut dyn RngCore) -> Option<GoalPlacement>;

    /// Steps that must elapse before the trigger is honoured.
    fn min_steps_before_new_goal(&self) -> u32 {
        0
    }
}

// ============================================================================
// Solver
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct GoalPlacementSolver {
    config: PlacementConfig,
}

impl GoalPlacementSolver {
    pub fn new(config: PlacementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    fn in_band(&self, d: u32) -> bool {
        (self.config.min_distance_from_player..=self.config.max_distance_from_player).contains(&d)
    }

    fn in_relaxed_band(&self, d: u32) -> bool {
        (self.config.relaxed_min_distance..=self.config.relaxed_max_distance).contains(&d)
    }

    /// Free cells: in bounds, no obstacle, no goal, no player.
    fn free_cells<'g>(grid: &'g GridState, goals: &'g [Goal]) -> impl Iterator<Item = Position> + 'g {
        let n = grid.size();
        (0..n * n)
            .map(move |i| Position::from_cell_index(i, n))
            .filter(move |p| grid.is_free(*p) && !goals.iter().any(|g| g.pos == *p))
    }

    /// Primary-search hits. Empty for the no-op conditions.
    pub fn candidates(&self, req: &PlacementRequest<'_>) -> Vec<Position> {
        let cfg = &self.config;
        match (req.condition, req.player2) {
            (GoalCondition::Pair(cond), Some(p2)) => {
                let old_d1 = distance(req.player1, req.old_goal);
                let old_d2 = distance(p2, req.old_goal);
                let old_sum = old_d1 + old_d2;

                Self::free_cells(req.grid, req.goals)
                    .filter(|cell| {
                        let d1 = distance(req.player1, *cell);
                        let d2 = distance(p2, *cell);
                        if !self.in_band(d1) || !self.in_band(d2) {
                            return false;
                        }
                        let sum_ok = (d1 + d2).abs_diff(old_sum) <= cfg.sum_tolerance;
                        match cond {
                            DistanceCondition::CloserToPlayer1 => sum_ok && d1 + cfg.closer_margin <= old_d1,
                            DistanceCondition::CloserToPlayer2 => sum_ok && d2 + cfg.closer_margin <= old_d2,
                            DistanceCondition::EqualToBoth => sum_ok && d1.abs_diff(d2) < cfg.equal_tolerance,
                            DistanceCondition::NoNewGoal => false,
                        }
                    })
                    .collect()
            }
            (GoalCondition::Solo(cond), _) => {
                let old_d = distance(req.player1, req.old_goal);

                Self::free_cells(req.grid, req.goals)
                    .filter(|cell| {
                        let d = distance(req.player1, *cell);
                        if !self.in_band(d) {
                            return false;
                        }
                        if distance(req.old_goal, *cell) < cfg.min_distance_between_goals {
                            return false;
                        }
                        match cond {
                            SoloCondition::CloserToPlayer1 => d + cfg.solo_margin <= old_d,
                            SoloCondition::FartherFromPlayer1 => d >= old_d + cfg.solo_margin,
                            SoloCondition::EqualToPlayer1 => d.abs_diff(old_d) < cfg.equal_tolerance,
                            SoloCondition::NoNewGoal => false,
                        }
                    })
                    .collect()
            }
            (GoalCondition::Pair(_), None) => Vec::new(),
        }
    }

    /// Relaxed-search hits: only the broad distance band per player.
    pub fn relaxed_candidates(&self, req: &PlacementRequest<'_>) -> Vec<Position> {
        if req.condition.is_no_op() {
            return Vec::new();
        }
        Self::free_cells(req.grid, req.goals)
            .filter(|cell| {
                self.in_relaxed_band(distance(req.player1, *cell))
                    && req.player2.map_or(true, |p2| self.in_relaxed_band(distance(p2, *cell)))
            })
            .collect()
    }

    fn describe(&self, req: &PlacementRequest<'_>, position: Position, relaxed: bool) -> GoalPlacement {
        let d1 = distance(req.player1, position);
        let d2 = req.player2.map(|p2| distance(p2, position));
        GoalPlacement {
            position,
            condition: req.condition,
            distance_to_player1: d1,
            distance_to_player2: d2,
            distance_sum: d1 + d2.unwrap_or(0),
            relaxed,
        }
    }
}

impl GoalPlacer for GoalPlacementSolver {
    fn place(&self, req: &PlacementRequest<'_>, rng: &mut dyn RngCore) -> Option<GoalPlacement> {
        if req.condition.is_no_op() {
            return None;
        }

        let primary = self.candidates(req);
        tracing::debug!(condition = %req.condition, hits = primary.len(), "primary goal search");
        if let Some(pos) = primary.choose(rng) {
            return Some(self.describe(req, *pos, false));
        }

        let relaxed = self.relaxed_candidates(req);
        tracing::info!(condition = %req.condition, hits = relaxed.len(), "primary goal search empty, relaxing");
        relaxed.choose(rng).map(|pos| self.describe(req, *pos, true))
    }

    fn min_steps_before_new_goal(&self) -> u32 {
        self.config.min_steps_before_new_goal
    }
}

// ============================================================================
// Condition sequences
// ============================================================================

/// `n` conditions with every entry of `conditions` appearing ⌊n/k⌋ times,
/// the remainder drawn at random, then shuffled (Fisher-Yates).
pub fn balanced_sequence<T: Clone, R: Rng + ?Sized>(n: usize, conditions: &[T], rng: &mut R) -> Vec<T> {
    if conditions.is_empty() {
        return Vec::new();
    }
    let per = n / conditions.len();
    let mut seq: Vec<T> = Vec::with_capacity(n);
    for c in conditions {
        seq.extend(std::iter::repeat(c.clone()).take(per));
    }
    while seq.len() < n {
        let pick = rng.gen_range(0..conditions.len());
        seq.push(conditions[pick].clone());
    }
    seq.shuffle(rng);
    seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::geometry::PlayerId;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn board(p1: Position, p2: Option<Position>, goals: &[Position]) -> (GridState, Vec<Goal>) {
        let mut grid = GridState::new(15);
        grid.set_player(PlayerId::Player1, p1).unwrap();
        if let Some(p2) = p2 {
            grid.set_player(PlayerId::Player2, p2).unwrap();
        }
        let goals: Vec<Goal> = goals
            .iter()
            .enumerate()
            .map(|(i, p)| {
                grid.place_goal(*p).unwrap();
                Goal::new(i, *p)
            })
            .collect();
        (grid, goals)
    }

    #[test]
    fn test_closer_to_player1_candidates() {
        let p1 = Position::new(4, 5);
        let p2 = Position::new(4, 9);
        let (grid, goals) = board(p1, Some(p2), &[Position::new(1, 7), Position::new(13, 7)]);
        let solver = GoalPlacementSolver::default();
        let req = PlacementRequest {
            grid: &grid,
            player1: p1,
            player2: Some(p2),
            goals: &goals,
            old_goal: Position::new(1, 7),
            condition: GoalCondition::Pair(DistanceCondition::CloserToPlayer1),
        };
        let cfg = solver.config().clone();
        let old_d1 = distance(p1, req.old_goal);
        let old_sum = old_d1 + distance(p2, req.old_goal);

        let hits = solver.candidates(&req);
        assert!(!hits.is_empty());
        for cell in hits {
            let d1 = distance(p1, cell);
            let sum = d1 + distance(p2, cell);
            assert!(d1 + cfg.closer_margin <= old_d1);
            assert!(sum.abs_diff(old_sum) <= cfg.sum_tolerance);
            assert!(!goals.iter().any(|g| g.pos == cell));
        }
    }

    #[test]
    fn test_no_new_goal_is_noop() {
        let p1 = Position::new(7, 2);
        let (grid, goals) = board(p1, Some(Position::new(7, 12)), &[Position::new(1, 7)]);
        let req = PlacementRequest {
            grid: &grid,
            player1: p1,
            player2: Some(Position::new(7, 12)),
            goals: &goals,
            old_goal: Position::new(1, 7),
            condition: GoalCondition::Pair(DistanceCondition::NoNewGoal),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(GoalPlacementSolver::default().place(&req, &mut rng).is_none());
    }

    #[test]
    fn test_relaxed_fallback_when_primary_empty() {
        let mut cfg = PlacementConfig::default();
        cfg.closer_margin = 40;
        let solver = GoalPlacementSolver::new(cfg);
        let p1 = Position::new(7, 2);
        let p2 = Position::new(7, 12);
        let (grid, goals) = board(p1, Some(p2), &[Position::new(1, 7), Position::new(13, 7)]);
        let req = PlacementRequest {
            grid: &grid,
            player1: p1,
            player2: Some(p2),
            goals: &goals,
            old_goal: Position::new(1, 7),
            condition: GoalCondition::Pair(DistanceCondition::CloserToPlayer2),
        };
        assert!(solver.candidates(&req).is_empty());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let placed = solver.place(&req, &mut rng).unwrap();
        assert!(placed.relaxed);
        assert!(grid.is_free(placed.position));
    }

    #[test]
    fn test_exhausted_returns_none() {
        let mut cfg = PlacementConfig::default();
        cfg.closer_margin = 40;
        cfg.relaxed_min_distance = 30;
        cfg.relaxed_max_distance = 31;
        let solver = GoalPlacementSolver::new(cfg);
        let p1 = Position::new(7, 2);
        let (grid, goals) = board(p1, None, &[Position::new(2, 7), Position::new(12, 7)]);
        let req = PlacementRequest {
            grid: &grid,
            player1: p1,
            player2: None,
            goals: &goals,
            old_goal: Position::new(2, 7),
            condition: GoalCondition::Solo(SoloCondition::CloserToPlayer1),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        assert!(solver.place(&req, &mut rng).is_none());
    }

    #[test]
    fn test_solo_farther_keeps_goal_spacing() {
        let p1 = Position::new(7, 7);
        let (grid, goals) = board(p1, None, &[Position::new(2, 7), Position::new(12, 7)]);
        let solver = GoalPlacementSolver::default();
        let req = PlacementRequest {
            grid: &grid,
            player1: p1,
            player2: None,
            goals: &goals,
            old_goal: Position::new(2, 7),
            condition: GoalCondition::Solo(SoloCondition::FartherFromPlayer1),
        };
        let hits = solver.candidates(&req);
        assert!(!hits.is_empty());
        for cell in hits {
            assert!(distance(p1, cell) >= 5 + solver.config().solo_margin);
            assert!(distance(goals[0].pos, cell) >= 3);
        }
    }

    #[test]
    fn test_balanced_sequence_counts() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let seq = balanced_sequence(12, &DistanceCondition::ALL, &mut rng);
        assert_eq!(seq.len(), 12);
        for c in DistanceCondition::ALL {
            assert_eq!(seq.iter().filter(|x| **x == c).count(), 3);
        }

        let seq = balanced_sequence(10, &DistanceCondition::ALL, &mut rng);
        assert_eq!(seq.len(), 10);
        for c in DistanceCondition::ALL {
            assert!(seq.iter().filter(|x| **x == c).count() >= 2);
        }
        assert!(balanced_sequence::<u8, _>(5, &[], &mut rng).is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_equal_to_both_within_tolerance(
                p1 in (0i32..15, 0i32..15),
                p2 in (0i32..15, 0i32..15),
                g in (0i32..15, 0i32..15),
                tol in 1u32..3,
            ) {
                let (p1, p2, g) = (Position::from(p1), Position::from(p2), Position::from(g));
                prop_assume!(g != p1 && g != p2);

                let mut cfg = PlacementConfig::default();
                cfg.equal_tolerance = tol;
                let solver = GoalPlacementSolver::new(cfg);
                let (grid, goals) = board(p1, Some(p2), &[g]);
                let req = PlacementRequest {
                    grid: &grid,
                    player1: p1,
                    player2: Some(p2),
                    goals: &goals,
                    old_goal: g,
                    condition: GoalCondition::Pair(DistanceCondition::EqualToBoth),
                };
                for cell in solver.candidates(&req) {
                    prop_assert!(distance(p1, cell).abs_diff(distance(p2, cell)) < tol);
                }
            }
        }
    }
}
