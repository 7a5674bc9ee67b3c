//! # Experiment Log
//!
//! Frozen per-trial records and the success-threshold tracker that can end a
//! collaboration block early.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::geometry::PlayerId;
use super::placement::GoalCondition;
use super::trial::{ExperimentType, TrialOutcome, TrialSnapshot};

// ============================================================================
// Trial records
// ============================================================================

/// A participant replaced by an artificial partner mid-trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackIncident {
    pub player: PlayerId,
    pub at_step: u32,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_index: u32,
    pub experiment: ExperimentType,
    pub condition: GoalCondition,
    pub partner: String,
    pub outcome: Option<TrialOutcome>,
    pub success: bool,
    pub steps: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub fallback_incidents: Vec<FallbackIncident>,
    /// Final state, histories included.
    pub state: TrialSnapshot,
}

impl TrialRecord {
    pub fn new(
        state: TrialSnapshot,
        partner: impl Into<String>,
        started_at: DateTime<Utc>,
        fallback_incidents: Vec<FallbackIncident>,
    ) -> Self {
        let outcome = state.outcome;
        Self {
            trial_index: state.trial_index,
            experiment: state.experiment,
            condition: state.condition,
            partner: partner.into(),
            success: outcome.map_or(false, TrialOutcome::is_success),
            outcome,
            steps: state.step_count,
            started_at,
            finished_at: Utc::now(),
            fallback_incidents,
            state,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

// ============================================================================
// Success threshold
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessThreshold {
    pub enabled: bool,
    /// (default: 5)
    pub consecutive_successes_required: u32,
    /// Completed trials before the streak is checked (default: 12)
    pub min_trials_before_check: u32,
    /// Hard cap per block (default: 24)
    pub max_trials: u32,
}

impl Default for SuccessThreshold {
    fn default() -> Self {
        Self { enabled: true, consecutive_successes_required: 5, min_trials_before_check: 12, max_trials: 24 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentLog {
    pub threshold: SuccessThreshold,
    records: Vec<TrialRecord>,
    consecutive_successes: u32,
    last_success_trial: Option<u32>,
    ended_early: bool,
}

impl ExperimentLog {
    pub fn new(threshold: SuccessThreshold) -> Self {
        Self { threshold, ..Self::default() }
    }

    pub fn push(&mut self, record: TrialRecord) {
        if record.experiment.is_two_player() {
            if record.success {
                self.consecutive_successes += 1;
                self.last_success_trial = Some(record.trial_index);
            } else {
                self.consecutive_successes = 0;
            }
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn last_success_trial(&self) -> Option<u32> {
        self.last_success_trial
    }

    pub fn ended_early(&self) -> bool {
        self.ended_early
    }

    pub fn success_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let wins = self.records.iter().filter(|r| r.success).count();
        wins as f64 / self.records.len() as f64
    }

    /// Whether a collaboration block should stop after the trials logged so
    /// far. Only two-player experiments are subject to the threshold.
    pub fn should_end_block(&mut self, experiment: ExperimentType) -> bool {
        if !experiment.is_two_player() || !self.threshold.enabled {
            return false;
        }
        let completed = self.records.iter().filter(|r| r.experiment == experiment).count() as u32;
        if completed >= self.threshold.max_trials {
            info!(%experiment, completed, "block ended at trial cap");
            return true;
        }
        if completed >= self.threshold.min_trials_before_check
            && self.consecutive_successes >= self.threshold.consecutive_successes_required
        {
            self.ended_early = true;
            info!(
                %experiment,
                completed,
                streak = self.consecutive_successes,
                "block ended early on success streak"
            );
            return true;
        }
        false
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::GridConfig;
    use crate::engine::trial::{TrialDesign, TrialMachine};

    fn record(index: u32, experiment: ExperimentType, success: bool) -> TrialRecord {
        let design = TrialDesign::fallback(experiment);
        let snapshot = TrialMachine::new(index, &design, &GridConfig::default(), GoalCondition::default())
            .unwrap()
            .snapshot();
        let mut r = TrialRecord::new(snapshot, "joint", Utc::now(), vec![]);
        r.success = success;
        r
    }

    #[test]
    fn test_streak_resets_on_failure() {
        let mut log = ExperimentLog::default();
        log.push(record(0, ExperimentType::TwoP2G, true));
        log.push(record(1, ExperimentType::TwoP2G, true));
        assert_eq!(log.consecutive_successes(), 2);
        log.push(record(2, ExperimentType::TwoP2G, false));
        assert_eq!(log.consecutive_successes(), 0);
        assert_eq!(log.last_success_trial(), Some(1));
        assert!((log.success_rate() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_early_end_needs_min_trials() {
        let mut log = ExperimentLog::new(SuccessThreshold {
            consecutive_successes_required: 2,
            min_trials_before_check: 4,
            ..SuccessThreshold::default()
        });
        for i in 0..3 {
            log.push(record(i, ExperimentType::TwoP3G, true));
            assert!(!log.should_end_block(ExperimentType::TwoP3G));
        }
        log.push(record(3, ExperimentType::TwoP3G, true));
        assert!(log.should_end_block(ExperimentType::TwoP3G));
        assert!(log.ended_early());
    }

    #[test]
    fn test_single_player_blocks_ignore_threshold() {
        let mut log = ExperimentLog::new(SuccessThreshold { max_trials: 1, ..SuccessThreshold::default() });
        log.push(record(0, ExperimentType::OneP1G, true));
        log.push(record(1, ExperimentType::OneP1G, true));
        assert_eq!(log.consecutive_successes(), 0);
        assert!(!log.should_end_block(ExperimentType::OneP1G));
    }

    #[test]
    fn test_record_json_roundtrip() {
        let r = record(7, ExperimentType::TwoP3G, false);
        let json = serde_json::to_string(&r).unwrap();
        let back: TrialRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trial_index, 7);
        assert_eq!(back.state, r.state);
        assert!(back.duration_ms() >= 0);
    }
}
