//! # Experiment Configuration Module
//!
//! Every tuning constant of the task in one place: grid size, solver rewards,
//! goal-placement distances, sync timings and agent pacing.
//!
//! ## Usage
//! ```rust
//! use gw_core::engine::config::ExperimentConfig;
//!
//! let config = ExperimentConfig::default();
//! let quick = ExperimentConfig::fast_solver();
//! assert!(quick.validate().is_ok());
//! ```

mod env;
mod grid_config;
mod placement_config;
mod solver_config;
mod sync_config;

pub use env::{load_from_env, load_from_path, CONFIG_PATH_ENV};
pub use grid_config::GridConfig;
pub use placement_config::PlacementConfig;
pub use solver_config::SolverConfig;
pub use sync_config::{AgentConfig, FallbackPartner, SyncConfig};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl ExperimentConfig {
    /// Looser convergence for tests and CLI batch runs
    pub fn fast_solver() -> Self {
        let mut cfg = Self::default();
        cfg.solver.max_iterations = 40;
        cfg.solver.convergence_threshold = 1e-2;
        cfg
    }

    /// Host-resolved human turns (paired sessions with strict alternation)
    pub fn turn_locked() -> Self {
        let mut cfg = Self::default();
        cfg.sync.synchronized_human_turns = true;
        cfg
    }

    /// `GW_CONFIG_PATH` when set, defaults otherwise.
    pub fn from_env() -> Result<Self> {
        Ok(load_from_env()?.unwrap_or_default())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid.size < 2 {
            return Err(CoreError::InvalidConfig(format!(
                "grid.size must be at least 2, got {}",
                self.grid.size
            )));
        }
        if self.grid.max_game_length == 0 {
            return Err(CoreError::InvalidConfig("grid.max_game_length must be > 0".into()));
        }
        let s = &self.solver;
        if !(0.0..1.0).contains(&s.discount) {
            return Err(CoreError::InvalidConfig(format!(
                "solver.discount must be in [0, 1), got {}",
                s.discount
            )));
        }
        if !s.softmax_beta.is_finite() || s.softmax_beta <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "solver.softmax_beta must be positive, got {}",
                s.softmax_beta
            )));
        }
        if s.convergence_threshold <= 0.0 || s.max_iterations == 0 {
            return Err(CoreError::InvalidConfig(
                "solver convergence needs threshold > 0 and max_iterations > 0".into(),
            ));
        }
        if s.cache_capacity == 0 {
            return Err(CoreError::InvalidConfig("solver.cache_capacity must be > 0".into()));
        }
        let p = &self.placement;
        if p.min_distance_from_player > p.max_distance_from_player {
            return Err(CoreError::InvalidConfig(format!(
                "placement distance band is empty: {}..={}",
                p.min_distance_from_player, p.max_distance_from_player
            )));
        }
        if p.relaxed_min_distance > p.relaxed_max_distance {
            return Err(CoreError::InvalidConfig(format!(
                "placement relaxed band is empty: {}..={}",
                p.relaxed_min_distance, p.relaxed_max_distance
            )));
        }
        if p.equal_tolerance == 0 {
            return Err(CoreError::InvalidConfig("placement.equal_tolerance must be > 0".into()));
        }
        if self.sync.move_throttle_ms > self.sync.local_move_protection_ms {
            return Err(CoreError::InvalidConfig(format!(
                "sync.move_throttle_ms ({}) exceeds local_move_protection_ms ({})",
                self.sync.move_throttle_ms, self.sync.local_move_protection_ms
            )));
        }
        Ok(())
    }
}

// ========== Tests ==========

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ExperimentConfig::default();
        assert_eq!(cfg.grid.size, 15);
        assert_eq!(cfg.grid.max_game_length, 60);
        assert!((cfg.solver.discount - 0.9).abs() < 1e-9);
        assert!((cfg.solver.softmax_beta - 3.0).abs() < 1e-9);
        assert_eq!(cfg.sync.local_move_protection_ms, 300);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_fast_solver_is_looser() {
        let base = ExperimentConfig::default();
        let fast = ExperimentConfig::fast_solver();
        assert!(fast.solver.max_iterations < base.solver.max_iterations);
        assert!(fast.solver.convergence_threshold > base.solver.convergence_threshold);
    }

    #[test]
    fn test_validate_rejects_bad_discount() {
        let mut cfg = ExperimentConfig::default();
        cfg.solver.discount = 1.0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_validate_rejects_empty_band() {
        let mut cfg = ExperimentConfig::default();
        cfg.placement.min_distance_from_player = 9;
        cfg.placement.max_distance_from_player = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg = ExperimentConfig::from_json(r#"{"grid":{"size":9,"max_game_length":30}}"#)
            .unwrap();
        assert_eq!(cfg.grid.size, 9);
        assert_eq!(cfg.placement.closer_margin, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let cfg = ExperimentConfig::turn_locked();
        let json = cfg.to_json().unwrap();
        let parsed = ExperimentConfig::from_json(&json).unwrap();
        assert!(parsed.sync.synchronized_human_turns);
        assert!((parsed.solver.goal_reward - cfg.solver.goal_reward).abs() < 1e-9);
    }
}
