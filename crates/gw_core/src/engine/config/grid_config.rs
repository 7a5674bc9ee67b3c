//! Grid / trial length configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Side length N of the square grid (default: 15)
    pub size: usize,
    /// Hard step cap per trial (default: 60)
    pub max_game_length: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { size: 15, max_game_length: 60 }
    }
}
