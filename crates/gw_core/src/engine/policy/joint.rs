//! # Joint Policy Solver
//!
//! Tabular value iteration over the joint (human × agent) position space for a
//! fixed goal set. The resulting policy gives, for every joint state, a
//! softmax distribution over the agent's four moves that still depends on
//! where the human stands.
//!
//! ## Layout
//! - cell index `c = row * N + col`
//! - joint state `s = human_cell * N² + agent_cell`
//! - joint action `j = agent_action * 4 + human_action` (action order as in
//!   [`Direction::ALL`])
//!
//! Terminal states (either player on a goal) keep value 0 and are never
//! updated. Sweeps are Gauss-Seidel: updated values are visible to later
//! states in the same sweep.

use std::time::Instant;

use tracing::debug;

use super::sampling::softmax;
use crate::engine::config::SolverConfig;
use crate::engine::geometry::{distance, step, Direction, Position};

pub const JOINT_ACTIONS: usize = 16;

#[derive(Debug, Clone)]
pub struct JointPolicySolver {
    size: usize,
    config: SolverConfig,
}

impl JointPolicySolver {
    pub fn new(size: usize, config: SolverConfig) -> Self {
        Self { size, config }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn solve(&self, goals: &[Position]) -> JointPolicy {
        let started = Instant::now();
        let n = self.size;
        let cells = n * n;
        let states = cells * cells;
        let cfg = &self.config;

        let mut is_goal = vec![false; cells];
        for g in goals {
            if let Some(i) = g.cell_index(n) {
                is_goal[i] = true;
            }
        }

        // transitions[c][a] = destination cell, None when off the grid
        let transitions: Vec<[Option<usize>; 4]> = (0..cells)
            .map(|c| {
                let pos = Position::from_cell_index(c, n);
                let mut row = [None; 4];
                for d in Direction::ALL {
                    row[d.index()] = step(pos, d.delta()).cell_index(n);
                }
                row
            })
            .collect();

        let reward = |nh: usize, na: usize| -> f64 {
            let mut r = 2.0 * cfg.step_cost;
            if is_goal[nh] {
                r += cfg.goal_reward;
            }
            if is_goal[na] {
                r += cfg.goal_reward;
            }
            if is_goal[nh] && nh == na {
                r += cfg.collaboration_bonus;
            }
            let gap = distance(Position::from_cell_index(nh, n), Position::from_cell_index(na, n)) as f64;
            r - (cfg.proximity_weight * gap).min(cfg.proximity_cap)
        };

        let terminal = |s: usize| is_goal[s / cells] || is_goal[s % cells];

        let mut values = vec![0.0f64; states];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < cfg.max_iterations {
            iterations += 1;
            let mut max_delta = 0.0f64;

            for s in 0..states {
                if terminal(s) {
                    continue;
                }
                let (h, a) = (s / cells, s % cells);
                let mut best = f64::NEG_INFINITY;
                for aa in 0..4 {
                    let Some(na) = transitions[a][aa] else { continue };
                    for ah in 0..4 {
                        let Some(nh) = transitions[h][ah] else { continue };
                        let q = reward(nh, na) + cfg.discount * values[nh * cells + na];
                        if q > best {
                            best = q;
                        }
                    }
                }
                if best.is_finite() {
                    max_delta = max_delta.max((best - values[s]).abs());
                    values[s] = best;
                }
            }

            if max_delta < cfg.convergence_threshold {
                converged = true;
                break;
            }
        }

        let mut q_table = vec![[f64::NEG_INFINITY; JOINT_ACTIONS]; states];
        let mut distributions: Vec<Option<[f64; 4]>> = vec![None; states];

        for s in 0..states {
            if terminal(s) {
                continue;
            }
            let (h, a) = (s / cells, s % cells);
            let q = &mut q_table[s];
            for aa in 0..4 {
                let Some(na) = transitions[a][aa] else { continue };
                for ah in 0..4 {
                    let Some(nh) = transitions[h][ah] else { continue };
                    q[aa * 4 + ah] = reward(nh, na) + cfg.discount * values[nh * cells + na];
                }
            }

            let joint = softmax(&q[..], cfg.softmax_beta);
            let mut marginal = [0.0f64; 4];
            for (j, p) in joint.iter().enumerate() {
                marginal[j / 4] += p;
            }
            distributions[s] = Some(marginal);
        }

        debug!(
            size = n,
            goals = goals.len(),
            iterations,
            converged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "joint policy solved"
        );

        JointPolicy { size: n, goals: goals.to_vec(), values, q_table, distributions, iterations, converged }
    }
}

/// Solved policy for one goal set. Immutable.
#[derive(Debug, Clone)]
pub struct JointPolicy {
    size: usize,
    goals: Vec<Position>,
    values: Vec<f64>,
    q_table: Vec<[f64; JOINT_ACTIONS]>,
    distributions: Vec<Option<[f64; 4]>>,
    iterations: u32,
    converged: bool,
}

impl JointPolicy {
    fn state_index(&self, human: Position, agent: Position) -> Option<usize> {
        let cells = self.size * self.size;
        Some(human.cell_index(self.size)? * cells + agent.cell_index(self.size)?)
    }

    /// Probability of each agent move (order of [`Direction::ALL`]).
    /// `None` for terminal or off-grid states.
    pub fn distribution(&self, human: Position, agent: Position) -> Option<[f64; 4]> {
        self.distributions[self.state_index(human, agent)?]
    }

    /// The 16 joint Q-values; illegal pairs hold `-inf`.
    pub fn q_values(&self, human: Position, agent: Position) -> Option<&[f64; JOINT_ACTIONS]> {
        let s = self.state_index(human, agent)?;
        self.distributions[s].as_ref()?;
        Some(&self.q_table[s])
    }

    pub fn value(&self, human: Position, agent: Position) -> Option<f64> {
        self.state_index(human, agent).map(|s| self.values[s])
    }

    /// Most probable agent move.
    pub fn best_action(&self, human: Position, agent: Position) -> Option<Direction> {
        let dist = self.distribution(human, agent)?;
        let (idx, _) = dist
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        Direction::from_index(idx)
    }

    pub fn goals(&self) -> &[Position] {
        &self.goals
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Number of joint states with a distribution.
    pub fn covered_states(&self) -> usize {
        self.distributions.iter().filter(|d| d.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_solver(size: usize) -> JointPolicySolver {
        let mut cfg = SolverConfig::default();
        cfg.max_iterations = 200;
        JointPolicySolver::new(size, cfg)
    }

    #[test]
    fn test_terminal_states_hold_zero() {
        let goal = Position::new(2, 2);
        let policy = small_solver(5).solve(&[goal]);
        assert_eq!(policy.value(goal, Position::new(0, 0)), Some(0.0));
        assert_eq!(policy.value(Position::new(4, 4), goal), Some(0.0));
        assert!(policy.distribution(goal, Position::new(0, 0)).is_none());
        assert!(policy.distribution(Position::new(0, 0), Position::new(4, 4)).is_some());
    }

    #[test]
    fn test_converges_on_small_grid() {
        let policy = small_solver(5).solve(&[Position::new(0, 4), Position::new(4, 0)]);
        assert!(policy.converged());
        assert!(policy.iterations() < 200);
    }

    #[test]
    fn test_out_of_bounds_pairs_excluded() {
        let policy = small_solver(4).solve(&[Position::new(3, 3)]);
        let q = policy.q_values(Position::new(0, 0), Position::new(1, 1)).unwrap();
        // Human moving up from row 0 is illegal for every agent action.
        for aa in 0..4 {
            assert_eq!(q[aa * 4 + Direction::Up.index()], f64::NEG_INFINITY);
        }
        // Agent at (0,1) cannot go up: zero mass on Up.
        let dist = policy.distribution(Position::new(2, 2), Position::new(0, 1)).unwrap();
        assert_eq!(dist[Direction::Up.index()], 0.0);
    }

    #[test]
    fn test_agent_heads_for_adjacent_goal() {
        let goal = Position::new(2, 4);
        let policy = small_solver(5).solve(&[goal]);
        // Agent right next to the goal, human far away.
        assert_eq!(policy.best_action(Position::new(4, 0), Position::new(2, 3)), Some(Direction::Right));
    }

    #[test]
    fn test_prefers_goal_shared_with_human() {
        // Agent is one step from B, but only A can be reached by both players
        // on the same step; the human can idle next to A until the agent arrives.
        let a = Position::new(0, 0);
        let b = Position::new(0, 6);
        let policy = small_solver(7).solve(&[a, b]);
        let human = Position::new(1, 0);
        let agent = Position::new(0, 5);
        let dist = policy.distribution(human, agent).unwrap();
        assert!(dist[Direction::Left.index()] > dist[Direction::Right.index()]);
        assert_eq!(policy.best_action(human, agent), Some(Direction::Left));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(8))]

            #[test]
            fn prop_distributions_sum_to_one(
                goals in proptest::collection::btree_set((0i32..5, 0i32..5), 1..=3),
            ) {
                let goals: Vec<Position> = goals.into_iter().map(Position::from).collect();
                let mut cfg = SolverConfig::default();
                cfg.max_iterations = 30;
                let policy = JointPolicySolver::new(5, cfg).solve(&goals);
                prop_assert!(policy.covered_states() > 0);
                for h in 0..25 {
                    for a in 0..25 {
                        let (hp, ap) = (Position::from_cell_index(h, 5), Position::from_cell_index(a, 5));
                        if let Some(d) = policy.distribution(hp, ap) {
                            prop_assert!((d.iter().sum::<f64>() - 1.0).abs() < 1e-9);
                            prop_assert!(d.iter().all(|p| *p >= 0.0));
                        }
                    }
                }
            }
        }
    }
}
