//! # gw_core - Collaborative Grid-World Trial Engine
//!
//! Core of a two-agent grid navigation task used in collaboration research.
//! Two participants (human/human or human/AI) walk an N×N grid towards goals;
//! a trial succeeds when both end on the same goal.
//!
//! ## Features
//! - Trial state machine with simultaneous-move semantics and intent inference
//! - Joint value-iteration policy for an artificial partner (cached per goal set)
//! - Mid-trial goal injection under distance invariants
//! - Transport-agnostic partner synchronization (free real-time and host-resolved turns)
//!
//! Rendering, consent flows and data export live outside this crate; they read
//! [`TrialSnapshot`] values and feed moves back in.

// Allow unused code for features under development
#![allow(dead_code)]
// Doc formatting lints - purely cosmetic, fix incrementally
#![allow(clippy::doc_lazy_continuation)]
// Struct initialization pattern used intentionally
#![allow(clippy::field_reassign_with_default)]
// Solver/session constructors take their collaborators explicitly
#![allow(clippy::too_many_arguments)]
// Loop style - index loops mirror the joint-state layout
#![allow(clippy::needless_range_loop)]

pub mod engine;
pub mod error;
pub mod sync;

pub use engine::config::{
    AgentConfig, ExperimentConfig, FallbackPartner, GridConfig, PlacementConfig, SolverConfig,
    SyncConfig,
};
pub use engine::experiment::{ExperimentLog, SuccessThreshold, TrialRecord};
pub use engine::geometry::{Delta, Direction, Goal, PlayerId, Position};
pub use engine::grid::{CellKind, GridState};
pub use engine::placement::{DistanceCondition, GoalCondition, GoalPlacementSolver, SoloCondition};
pub use engine::policy::{
    AgentDecision, DecisionSource, JointPolicy, JointPolicySolver, PartnerKind, PolicyCache,
};
pub use engine::trial::{
    CompletionVerdict, ExperimentType, TrialDesign, TrialMachine, TrialOutcome, TrialPhase,
    TrialSnapshot,
};
pub use error::{CoreError, MoveRejection, Result};
pub use sync::{
    ChannelTransport, ConnectionState, DecisionProvider, Role, RoomManager, SyncEngine, SyncMode,
    Transport, TrialSession, WireMessage,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SNAPSHOT_SCHEMA_VERSION: u8 = 1;
