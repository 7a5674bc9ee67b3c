//! Trial lifecycle: designs, state, the state machine and snapshots.

mod design;
mod machine;
mod snapshot;
mod state;

pub use design::{ExperimentType, TrialDesign};
pub use machine::{MoveEffect, MoveOutcome, MoveTicket, TrialMachine};
pub use snapshot::{CompletionVerdict, TrialSnapshot};
pub use state::{NewGoalRecord, PlayerTrack, TrialOutcome, TrialPhase, TrialState};

#[cfg(test)]
mod tests;
