//! Trial engine: geometry, goal placement, the partner policy and the trial
//! state machine. Nothing here does I/O; the [`crate::sync`] layer drives it.

pub mod config;
pub mod experiment;
pub mod geometry;
pub mod grid;
pub mod placement;
pub mod policy;
pub mod trial;
