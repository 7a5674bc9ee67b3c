//! Wire messages exchanged between paired clients.
//!
//! Delivery is at-least-once and unordered: every message carries enough to be
//! deduplicated (move ids, snapshot revisions, trial indices).

use serde::{Deserialize, Serialize};

use crate::engine::geometry::{Direction, PlayerId};
use crate::engine::trial::{TrialOutcome, TrialSnapshot};
use crate::error::Result;

/// Unique per sender and trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveId {
    pub player: PlayerId,
    pub trial: u32,
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum WireMessage {
    MoveProposal { id: MoveId, direction: Direction, sent_at_ms: u64 },
    FullStateSnapshot {
        snapshot: Box<TrialSnapshot>,
        /// Per player, the highest move seq already folded into `snapshot`.
        #[serde(default)]
        applied_seq: [Option<u32>; 2],
        sent_at_ms: u64,
    },
    TrialComplete { trial: u32, outcome: TrialOutcome },
    PartnerDisconnect { player: PlayerId },
    ReadyStatus { player: PlayerId, ready: bool },
}

impl WireMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            WireMessage::MoveProposal { .. } => "move-proposal",
            WireMessage::FullStateSnapshot { .. } => "full-state-snapshot",
            WireMessage::TrialComplete { .. } => "trial-complete",
            WireMessage::PartnerDisconnect { .. } => "partner-disconnect",
            WireMessage::ReadyStatus { .. } => "ready-status",
        }
    }

    /// Trial the message belongs to, when it is trial-scoped.
    pub fn trial(&self) -> Option<u32> {
        match self {
            WireMessage::MoveProposal { id, .. } => Some(id.trial),
            WireMessage::FullStateSnapshot { snapshot, .. } => Some(snapshot.trial_index),
            WireMessage::TrialComplete { trial, .. } => Some(*trial),
            WireMessage::PartnerDisconnect { .. } | WireMessage::ReadyStatus { .. } => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_proposal_wire_shape() {
        let msg = WireMessage::MoveProposal {
            id: MoveId { player: PlayerId::Player2, trial: 3, seq: 9 },
            direction: Direction::Left,
            sent_at_ms: 1200,
        };
        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "move-proposal");
        assert_eq!(value["payload"]["id"]["player"], "player2");
        assert_eq!(WireMessage::from_json(&json).unwrap(), msg);
        assert_eq!(msg.trial(), Some(3));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let err = WireMessage::from_json(r#"{"event":"teleport","payload":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_event_names_match_tags() {
        let msg = WireMessage::ReadyStatus { player: PlayerId::Player1, ready: true };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], msg.event_name());
        assert_eq!(msg.trial(), None);
    }
}
