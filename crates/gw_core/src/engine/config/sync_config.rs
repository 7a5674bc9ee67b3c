//! Synchronization / Partner Timing Configuration

use serde::{Deserialize, Serialize};

/// What takes over when the remote partner drops out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPartner {
    JointPolicy,
    Greedy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Host-resolved turns instead of free real-time moves (default: false)
    pub synchronized_human_turns: bool,
    /// Window after a local move during which stale snapshots are deferred (default: 300)
    pub local_move_protection_ms: u64,
    /// Minimum spacing between outgoing full-state snapshots (default: 300)
    pub state_sync_interval_ms: u64,
    /// Minimum spacing between local inputs (default: 100)
    pub move_throttle_ms: u64,
    /// Poll interval of the goal-presence check (default: 100)
    pub goal_check_interval_ms: u64,
    /// Budget for an external decision provider before falling back (default: 2000)
    pub decision_timeout_ms: u64,
    /// Wall-clock limit per trial, 0 disables it (default: 0)
    pub trial_timeout_ms: u64,
    /// Replacement partner after disconnect (default: JointPolicy)
    pub fallback_partner: FallbackPartner,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            synchronized_human_turns: false,
            local_move_protection_ms: 300,
            state_sync_interval_ms: 300,
            move_throttle_ms: 100,
            goal_check_interval_ms: 100,
            decision_timeout_ms: 2000,
            trial_timeout_ms: 0,
            fallback_partner: FallbackPartner::JointPolicy,
        }
    }
}

/// Pacing of the artificial partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent moves in lock-step with each human move (default: true)
    pub synchronized_moves: bool,
    /// Delay before the agent's synchronized reply (default: 0)
    pub sync_delay_ms: u64,
    /// Interval of autonomous moves once the human sits on a goal (default: 300)
    pub independent_delay_ms: u64,
    /// Interval of autonomous moves in free mode (default: 500)
    pub free_move_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            synchronized_moves: true,
            sync_delay_ms: 0,
            independent_delay_ms: 300,
            free_move_interval_ms: 500,
        }
    }
}
