use thiserror::Error;

use crate::engine::geometry::{PlayerId, Position};
use crate::engine::placement::GoalCondition;

/// Why a move request was ignored. Never fatal; the caller just drops the input.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    #[error("trial is not running")]
    NotRunning,

    #[error("{0} is not part of this trial")]
    UnknownPlayer(PlayerId),

    #[error("{0} is already at a goal")]
    AlreadyAtGoal(PlayerId),

    #[error("a move for {0} is already in flight")]
    Busy(PlayerId),

    #[error("unrecognised direction")]
    InvalidDirection,

    #[error("input arrived inside the move throttle window")]
    Throttled,

    #[error("turn already proposed, waiting for the host")]
    AwaitingTurn,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("move rejected: {0}")]
    RejectedMove(#[from] MoveRejection),

    #[error("no joint policy available for goal set {fingerprint:016x}")]
    SolverUnavailable { fingerprint: u64 },

    #[error("no admissible cell for a new goal under {condition}")]
    GoalPlacementExhausted { condition: GoalCondition },

    #[error("partner {player} lost: {cause}")]
    PartnerLost { player: PlayerId, cause: String },

    #[error("protocol desync: {0}")]
    ProtocolDesync(String),

    #[error("cannot place goal at {0}")]
    InvalidGoal(Position),

    #[error("invalid trial design: {0}")]
    InvalidDesign(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("transport closed: {0}")]
    Transport(String),

    #[error("room unavailable: {0}")]
    RoomUnavailable(String),
}

impl CoreError {
    /// Recovered locally without ending the trial.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoreError::RejectedMove(_) => true,
            CoreError::SolverUnavailable { .. } => true,
            CoreError::GoalPlacementExhausted { .. } => true,
            CoreError::PartnerLost { .. } => true,
            CoreError::ProtocolDesync(_) => true,
            CoreError::InvalidGoal(_) => true,
            CoreError::InvalidDesign(_) => false,
            CoreError::InvalidConfig(_) => false,
            CoreError::Snapshot(_) => false,
            CoreError::Transport(_) => false,
            CoreError::RoomUnavailable(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
