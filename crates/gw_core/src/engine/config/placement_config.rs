//! Goal Placement Configuration

use serde::{Deserialize, Serialize};

/// Distance rules for mid-trial goal injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    // === Primary Search ===
    /// New goal must be this much closer to the favoured player (default: 3)
    pub closer_margin: u32,
    /// Allowed drift of d1 + d2 relative to the old goal (default: 2)
    pub sum_tolerance: u32,
    /// |d1 - d2| must stay strictly below this for "equal" (default: 1)
    pub equal_tolerance: u32,
    /// Nearest admissible distance from either player (default: 1)
    pub min_distance_from_player: u32,
    /// Farthest admissible distance from either player (default: 12)
    pub max_distance_from_player: u32,

    // === Relaxed Search ===
    /// Lower bound of the fallback band (default: 1)
    pub relaxed_min_distance: u32,
    /// Upper bound of the fallback band (default: 12)
    pub relaxed_max_distance: u32,

    // === Solo (one player, two goals) ===
    /// Margin for closer/farther on the solo variant (default: 3)
    pub solo_margin: u32,
    /// Minimum spacing between the new goal and the first goal (default: 3)
    pub min_distance_between_goals: u32,

    // === Timing ===
    /// Steps that must elapse before injection is considered (default: 1)
    pub min_steps_before_new_goal: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            closer_margin: 3,
            sum_tolerance: 2,
            equal_tolerance: 1,
            min_distance_from_player: 1,
            max_distance_from_player: 12,

            relaxed_min_distance: 1,
            relaxed_max_distance: 12,

            solo_margin: 3,
            min_distance_between_goals: 3,

            min_steps_before_new_goal: 1,
        }
    }
}
