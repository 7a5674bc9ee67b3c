//! Joint Policy Solver Configuration

use serde::{Deserialize, Serialize};

/// Value-iteration parameters for the artificial partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    // === Rewards ===
    /// Discount factor (default: 0.9)
    pub discount: f64,
    /// Per-agent cost of one step (default: -1.0)
    pub step_cost: f64,
    /// Reward for each agent arriving on a goal (default: 30.0)
    pub goal_reward: f64,
    /// Extra reward when both agents land on the same goal (default: 30.0)
    pub collaboration_bonus: f64,

    // === Shaping ===
    /// Inter-agent distance penalty weight (default: 0.01)
    pub proximity_weight: f64,
    /// Upper bound of the shaping penalty per step (default: 0.5)
    pub proximity_cap: f64,

    // === Action Selection ===
    /// Softmax inverse temperature (default: 3.0)
    pub softmax_beta: f64,

    // === Convergence ===
    /// Sweep limit (default: 100)
    pub max_iterations: u32,
    /// Stop once the largest value change falls below this (default: 1e-3)
    pub convergence_threshold: f64,

    /// Number of goal sets kept in the policy cache (default: 8)
    pub cache_capacity: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            discount: 0.9,
            step_cost: -1.0,
            goal_reward: 30.0,
            collaboration_bonus: 30.0,

            proximity_weight: 0.01,
            proximity_cap: 0.5,

            softmax_beta: 3.0,

            max_iterations: 100,
            convergence_threshold: 1e-3,

            cache_capacity: 8,
        }
    }
}
