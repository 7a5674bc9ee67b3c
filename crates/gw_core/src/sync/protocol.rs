//! # Synchronization Protocol
//!
//! [`SyncEngine`] is the sans-IO half of a paired session: it owns the local
//! [`TrialMachine`], turns local input and inbound [`WireMessage`]s into state
//! changes, and queues outbound messages in an outbox the driver flushes.
//!
//! ## Modes
//! - **Free real-time**: moves are applied optimistically and broadcast.
//!   Remote moves arriving within the local-move protection window are
//!   deferred; host snapshots are dropped while a local move is that fresh.
//! - **Turn-locked**: every side proposes, only the host resolves. The host
//!   fills a two-slot buffer and applies both moves at once when every active
//!   player has proposed, then broadcasts the full state.
//!
//! Duplicate move proposals (same [`MoveId`]) and snapshots with an already
//! seen revision are ignored. Snapshots also carry the highest move seq per
//! player they contain, so a proposal that arrives after the snapshot holding
//! it is dropped rather than applied a second time.

use std::collections::VecDeque;
use std::fmt;

use fxhash::FxHashSet;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::message::{MoveId, WireMessage};
use crate::engine::config::{AgentConfig, SyncConfig};
use crate::engine::geometry::{Direction, PlayerId};
use crate::engine::placement::GoalPlacer;
use crate::engine::trial::{MoveOutcome, NewGoalRecord, TrialMachine, TrialOutcome, TrialPhase, TrialSnapshot};
use crate::error::{CoreError, MoveRejection, Result};

// ============================================================================
// Roles, modes, connection states
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Resolves turns, places new goals and broadcasts authoritative state.
    Host,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FreeRealTime,
    TurnLocked,
}

impl SyncMode {
    /// Human pairs follow `synchronized_human_turns`; an artificial partner
    /// follows `synchronized_moves`.
    pub fn select(sync: &SyncConfig, agent: &AgentConfig, partner_is_human: bool) -> Self {
        let locked = if partner_is_human { sync.synchronized_human_turns } else { agent.synchronized_moves };
        if locked {
            SyncMode::TurnLocked
        } else {
            SyncMode::FreeRealTime
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    RoomJoining,
    Paired,
    InTrial,
    /// Partner replaced by an artificial agent; trials continue.
    Fallback,
}

impl ConnectionState {
    pub fn can_transition(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, RoomJoining)
                | (Connected, Disconnected)
                | (RoomJoining, Paired)
                | (RoomJoining, Disconnected)
                | (Paired, InTrial)
                | (Paired, Disconnected)
                | (InTrial, Paired)
                | (InTrial, Disconnected)
                | (Disconnected, Fallback)
                | (Fallback, Fallback)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::RoomJoining => "room-joining",
            ConnectionState::Paired => "paired",
            ConnectionState::InTrial => "in-trial",
            ConnectionState::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Pending moves
// ============================================================================

/// Two proposal slots for the turn at `turn` (the step count when filled).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingMoveBuffer {
    slots: [Option<Direction>; 2],
    turn: u32,
}

impl PendingMoveBuffer {
    pub fn get(&self, player: PlayerId) -> Option<Direction> {
        self.slots[player.index()]
    }

    /// Returns false when the slot was already taken for this turn.
    pub fn fill(&mut self, player: PlayerId, direction: Direction, turn: u32) -> bool {
        if self.slots.iter().all(Option::is_none) {
            self.turn = turn;
        }
        let slot = &mut self.slots[player.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(direction);
        true
    }

    pub fn take(&mut self) -> [Option<Direction>; 2] {
        std::mem::take(&mut self.slots)
    }

    pub fn clear(&mut self) {
        self.slots = [None, None];
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    MoveApplied(MoveOutcome),
    /// Remote move parked inside the protection window.
    MoveDeferred(MoveId),
    StateReplaced { revision: u64 },
    TrialCompleted(TrialOutcome),
    PartnerLost(PlayerId),
    PartnerReady { player: PlayerId, ready: bool },
}

#[derive(Debug, Clone, Copy)]
struct DeferredMove {
    id: MoveId,
    direction: Direction,
}

pub struct SyncEngine {
    local: PlayerId,
    role: Role,
    mode: SyncMode,
    connection: ConnectionState,
    config: SyncConfig,
    machine: TrialMachine,
    /// The other slot is driven in this process (artificial partner).
    partner_local: bool,
    /// A connected peer receives proposals and snapshots.
    peer: bool,
    pending: PendingMoveBuffer,
    seen: FxHashSet<MoveId>,
    /// Highest seq per player reflected in the local state (sent with snapshots).
    applied_seq: [Option<u32>; 2],
    /// Highest seq per player covered by an accepted remote snapshot.
    covered_seq: [Option<u32>; 2],
    deferred: VecDeque<DeferredMove>,
    outbox: Vec<WireMessage>,
    next_seq: u32,
    last_input_ms: Option<u64>,
    last_local_move_ms: Option<u64>,
    last_snapshot_sent_ms: Option<u64>,
    last_broadcast_revision: Option<u64>,
    last_remote_revision: Option<u64>,
    completion_announced: bool,
}

impl SyncEngine {
    pub fn new(
        local: PlayerId,
        role: Role,
        mode: SyncMode,
        config: SyncConfig,
        machine: TrialMachine,
        partner_local: bool,
    ) -> Self {
        Self {
            local,
            role,
            mode,
            connection: ConnectionState::Disconnected,
            config,
            machine,
            partner_local,
            peer: !partner_local,
            pending: PendingMoveBuffer::default(),
            seen: FxHashSet::default(),
            applied_seq: [None, None],
            covered_seq: [None, None],
            deferred: VecDeque::new(),
            outbox: Vec::new(),
            next_seq: 0,
            last_input_ms: None,
            last_local_move_ms: None,
            last_snapshot_sent_ms: None,
            last_broadcast_revision: None,
            last_remote_revision: None,
            completion_announced: false,
        }
    }

    pub fn machine(&self) -> &TrialMachine {
        &self.machine
    }

    pub fn snapshot(&self) -> TrialSnapshot {
        self.machine.snapshot()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn local_player(&self) -> PlayerId {
        self.local
    }

    pub fn partner_local(&self) -> bool {
        self.partner_local
    }

    pub fn is_complete(&self) -> bool {
        self.machine.phase() == TrialPhase::Completed
    }

    fn has_remote(&self) -> bool {
        self.peer
    }

    /// Adds a read-only peer (spectator) to a session whose partner is local.
    pub fn attach_observer(&mut self) {
        self.peer = true;
    }

    /// The peer went away without taking a player slot with it.
    pub fn detach_peer(&mut self) {
        self.peer = false;
        self.outbox.clear();
    }

    pub fn set_connection(&mut self, next: ConnectionState) -> Result<()> {
        if !self.connection.can_transition(next) {
            return Err(CoreError::ProtocolDesync(format!(
                "connection cannot go from {} to {}",
                self.connection, next
            )));
        }
        debug!(from = %self.connection, to = %next, "connection state");
        self.connection = next;
        Ok(())
    }

    /// Swaps in the next trial.
    pub fn begin_trial(&mut self, machine: TrialMachine) {
        self.machine = machine;
        self.pending.clear();
        self.seen.clear();
        self.applied_seq = [None, None];
        self.covered_seq = [None, None];
        self.deferred.clear();
        self.last_local_move_ms = None;
        self.last_broadcast_revision = None;
        self.last_remote_revision = None;
        self.completion_announced = false;
    }

    /// Starts the loaded trial; the host announces its initial state.
    pub fn start(&mut self, now_ms: u64) -> bool {
        if self.connection == ConnectionState::Paired {
            self.connection = ConnectionState::InTrial;
        }
        let started = self.machine.start(now_ms);
        if self.role == Role::Host {
            self.broadcast_state(now_ms, true);
        }
        started
    }

    /// Back to `Paired` between trials (no-op in fallback).
    pub fn end_trial(&mut self) {
        if self.connection == ConnectionState::InTrial {
            self.connection = ConnectionState::Paired;
        }
    }

    // ========================================================================
    // Local input
    // ========================================================================

    /// Input from the local participant. Throttled per `move_throttle_ms`.
    pub fn local_input(
        &mut self,
        direction: Direction,
        now_ms: u64,
    ) -> std::result::Result<Option<MoveOutcome>, MoveRejection> {
        if let Some(last) = self.last_input_ms {
            if now_ms.saturating_sub(last) < self.config.move_throttle_ms {
                return Err(MoveRejection::Throttled);
            }
        }
        self.last_input_ms = Some(now_ms);
        self.submit(self.local, direction, now_ms)
    }

    /// Move for the other slot, from an artificial partner in this process.
    pub fn partner_input(
        &mut self,
        direction: Direction,
        now_ms: u64,
    ) -> std::result::Result<Option<MoveOutcome>, MoveRejection> {
        let partner = self.local.other();
        if !self.partner_local {
            return Err(MoveRejection::UnknownPlayer(partner));
        }
        self.submit(partner, direction, now_ms)
    }

    /// Whether `player` still owes a proposal for the current turn.
    pub fn awaiting(&self, player: PlayerId) -> bool {
        if self.mode != SyncMode::TurnLocked || self.is_complete() {
            return false;
        }
        self.is_active(player) && self.pending.get(player).is_none()
    }

    fn is_active(&self, player: PlayerId) -> bool {
        let state = self.machine.state();
        state.position(player).is_some() && !state.is_at_goal(player)
    }

    fn submit(
        &mut self,
        player: PlayerId,
        direction: Direction,
        now_ms: u64,
    ) -> std::result::Result<Option<MoveOutcome>, MoveRejection> {
        match self.mode {
            SyncMode::FreeRealTime => {
                let outcome = self.machine.apply_move(player, direction, now_ms)?;
                self.last_local_move_ms = Some(now_ms);
                if self.has_remote() {
                    let id = self.next_move_id(player);
                    self.mark_applied(id);
                    self.outbox.push(WireMessage::MoveProposal { id, direction, sent_at_ms: now_ms });
                }
                self.after_mutation(&outcome, now_ms);
                Ok(Some(outcome))
            }
            SyncMode::TurnLocked => {
                if self.machine.phase() != TrialPhase::Running {
                    return Err(MoveRejection::NotRunning);
                }
                if self.machine.state().position(player).is_none() {
                    return Err(MoveRejection::UnknownPlayer(player));
                }
                if self.machine.state().is_at_goal(player) {
                    return Err(MoveRejection::AlreadyAtGoal(player));
                }
                let turn = self.machine.state().step_count;
                if !self.pending.fill(player, direction, turn) {
                    return Err(MoveRejection::AwaitingTurn);
                }
                if self.role == Role::Guest {
                    let id = self.next_move_id(player);
                    self.outbox.push(WireMessage::MoveProposal { id, direction, sent_at_ms: now_ms });
                    return Ok(None);
                }
                Ok(self.try_resolve(now_ms))
            }
        }
    }

    fn mark_applied(&mut self, id: MoveId) {
        let slot = &mut self.applied_seq[id.player.index()];
        *slot = Some(slot.map_or(id.seq, |s| s.max(id.seq)));
    }

    /// Already contained in an accepted snapshot.
    fn covered(&self, id: MoveId) -> bool {
        self.covered_seq[id.player.index()].map_or(false, |s| id.seq <= s)
    }

    fn next_move_id(&mut self, player: PlayerId) -> MoveId {
        let id = MoveId { player, trial: self.machine.trial_index(), seq: self.next_seq };
        self.next_seq += 1;
        id
    }

    /// Host only: applies the turn once every active player has proposed.
    fn try_resolve(&mut self, now_ms: u64) -> Option<MoveOutcome> {
        if self.role != Role::Host || self.machine.phase() != TrialPhase::Running {
            return None;
        }
        let ready = PlayerId::BOTH
            .into_iter()
            .filter(|p| self.is_active(*p))
            .all(|p| self.pending.get(p).is_some());
        if !ready || self.pending.is_empty() {
            return None;
        }

        let [d1, d2] = self.pending.take();
        match self.machine.apply_synchronized_moves(d1, d2, now_ms) {
            Ok(outcome) => {
                self.broadcast_state(now_ms, true);
                self.announce_completion();
                Some(outcome)
            }
            Err(reason) => {
                debug!(trial = self.machine.trial_index(), %reason, "turn dropped");
                None
            }
        }
    }

    fn after_mutation(&mut self, outcome: &MoveOutcome, now_ms: u64) {
        if self.role != Role::Host {
            return;
        }
        if outcome.verdict.is_complete() {
            self.broadcast_state(now_ms, true);
            self.announce_completion();
        } else {
            self.broadcast_state(now_ms, false);
        }
    }

    fn broadcast_state(&mut self, now_ms: u64, force: bool) {
        if !self.has_remote() {
            return;
        }
        let revision = self.machine.revision();
        if self.last_broadcast_revision == Some(revision) {
            return;
        }
        if !force {
            if let Some(last) = self.last_snapshot_sent_ms {
                if now_ms.saturating_sub(last) < self.config.state_sync_interval_ms {
                    return;
                }
            }
        }
        self.last_snapshot_sent_ms = Some(now_ms);
        self.last_broadcast_revision = Some(revision);
        self.outbox.push(WireMessage::FullStateSnapshot {
            snapshot: Box::new(self.machine.snapshot()),
            applied_seq: self.applied_seq,
            sent_at_ms: now_ms,
        });
    }

    fn announce_completion(&mut self) {
        if self.completion_announced || !self.has_remote() {
            return;
        }
        if let Some(outcome) = self.machine.state().outcome {
            self.completion_announced = true;
            self.outbox.push(WireMessage::TrialComplete { trial: self.machine.trial_index(), outcome });
        }
    }

    fn in_protection_window(&self, now_ms: u64) -> bool {
        self.last_local_move_ms
            .map_or(false, |t| now_ms.saturating_sub(t) < self.config.local_move_protection_ms)
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    pub fn handle_message(&mut self, message: WireMessage, now_ms: u64) -> Result<Option<SyncEvent>> {
        match message {
            WireMessage::MoveProposal { id, direction, .. } => self.on_remote_move(id, direction, now_ms),
            WireMessage::FullStateSnapshot { snapshot, applied_seq, .. } => {
                self.on_snapshot(&snapshot, applied_seq, now_ms)
            }
            WireMessage::TrialComplete { trial, outcome } => {
                if trial != self.machine.trial_index() || self.role == Role::Host {
                    return Ok(None);
                }
                Ok(Some(SyncEvent::TrialCompleted(outcome)))
            }
            WireMessage::PartnerDisconnect { player } => {
                if player == self.local {
                    return Err(CoreError::ProtocolDesync(format!("peer reported local {player} as lost")));
                }
                Ok(self.partner_lost("peer announced disconnect").then_some(SyncEvent::PartnerLost(player)))
            }
            WireMessage::ReadyStatus { player, ready } => Ok(Some(SyncEvent::PartnerReady { player, ready })),
        }
    }

    fn on_remote_move(&mut self, id: MoveId, direction: Direction, now_ms: u64) -> Result<Option<SyncEvent>> {
        if id.trial != self.machine.trial_index() {
            debug!(trial = self.machine.trial_index(), stale = id.trial, "dropping move from another trial");
            return Ok(None);
        }
        if id.player == self.local {
            return Err(CoreError::ProtocolDesync(format!("remote move for local {}", id.player)));
        }
        if self.covered(id) {
            debug!(trial = id.trial, seq = id.seq, "move already contained in a snapshot");
            return Ok(None);
        }
        if !self.seen.insert(id) {
            debug!(trial = id.trial, seq = id.seq, "duplicate move proposal");
            return Ok(None);
        }

        match self.mode {
            SyncMode::TurnLocked => {
                if self.role != Role::Host {
                    return Ok(None);
                }
                let turn = self.machine.state().step_count;
                if !self.pending.fill(id.player, direction, turn) {
                    debug!(trial = id.trial, player = %id.player, "slot already filled this turn");
                    return Ok(None);
                }
                Ok(self.try_resolve(now_ms).map(SyncEvent::MoveApplied))
            }
            SyncMode::FreeRealTime => {
                if self.in_protection_window(now_ms) {
                    self.deferred.push_back(DeferredMove { id, direction });
                    return Ok(Some(SyncEvent::MoveDeferred(id)));
                }
                Ok(self.apply_remote(id, direction, now_ms).map(SyncEvent::MoveApplied))
            }
        }
    }

    fn apply_remote(&mut self, id: MoveId, direction: Direction, now_ms: u64) -> Option<MoveOutcome> {
        match self.machine.apply_move(id.player, direction, now_ms) {
            Ok(outcome) => {
                self.mark_applied(id);
                self.after_mutation(&outcome, now_ms);
                Some(outcome)
            }
            Err(reason) => {
                debug!(trial = id.trial, player = %id.player, %reason, "remote move ignored");
                None
            }
        }
    }

    fn on_snapshot(
        &mut self,
        snapshot: &TrialSnapshot,
        applied_seq: [Option<u32>; 2],
        now_ms: u64,
    ) -> Result<Option<SyncEvent>> {
        if self.role == Role::Host {
            debug!(trial = snapshot.trial_index, "host ignores peer snapshot");
            return Ok(None);
        }
        if snapshot.trial_index != self.machine.trial_index() {
            return Err(CoreError::ProtocolDesync(format!(
                "snapshot for trial {} during trial {}",
                snapshot.trial_index,
                self.machine.trial_index()
            )));
        }
        if self.last_remote_revision.map_or(false, |r| snapshot.revision <= r) {
            return Ok(None);
        }
        let last = snapshot.phase == TrialPhase::Completed;
        if self.mode == SyncMode::FreeRealTime && !last && self.in_protection_window(now_ms) {
            debug!(trial = snapshot.trial_index, revision = snapshot.revision, "snapshot skipped, local move in flight");
            return Ok(None);
        }

        let changed = self.machine.sync_from(snapshot)?;
        self.last_remote_revision = Some(snapshot.revision);
        if snapshot.step_count > self.pending.turn() || last {
            self.pending.clear();
        }
        for (covered, applied) in self.covered_seq.iter_mut().zip(applied_seq) {
            if applied > *covered {
                *covered = applied;
            }
        }
        let before = self.deferred.len();
        let covered_seq = self.covered_seq;
        self.deferred
            .retain(|m| covered_seq[m.id.player.index()].map_or(true, |s| m.id.seq > s));
        if self.deferred.len() < before {
            debug!(dropped = before - self.deferred.len(), "deferred moves already in snapshot");
        }
        Ok(changed.then_some(SyncEvent::StateReplaced { revision: snapshot.revision }))
    }

    // ========================================================================
    // Periodic work
    // ========================================================================

    /// Flushes deferred remote moves and, for a free-mode host, sends a
    /// rate-limited snapshot.
    pub fn tick(&mut self, now_ms: u64) -> Vec<MoveOutcome> {
        let mut applied = Vec::new();
        if !self.in_protection_window(now_ms) {
            while let Some(m) = self.deferred.pop_front() {
                if let Some(outcome) = self.apply_remote(m.id, m.direction, now_ms) {
                    applied.push(outcome);
                }
            }
        }
        if self.role == Role::Host && self.mode == SyncMode::FreeRealTime {
            self.broadcast_state(now_ms, false);
        }
        applied
    }

    /// Host-only goal injection check.
    pub fn evaluate_new_goal(
        &mut self,
        placer: &dyn GoalPlacer,
        rng: &mut dyn RngCore,
        now_ms: u64,
    ) -> Option<NewGoalRecord> {
        if self.role != Role::Host {
            return None;
        }
        let record = self.machine.evaluate_new_goal(placer, rng);
        if record.is_some() {
            self.broadcast_state(now_ms, true);
        }
        record
    }

    /// Game timeout. Returns false if the trial had already ended.
    pub fn expire(&mut self, now_ms: u64) -> bool {
        if !self.machine.expire() {
            return false;
        }
        if self.role == Role::Host {
            self.broadcast_state(now_ms, true);
            self.announce_completion();
        }
        true
    }

    /// The peer is gone: this side becomes the host with the partner slot
    /// driven locally. Returns false if that already happened.
    pub fn partner_lost(&mut self, cause: &str) -> bool {
        self.peer = false;
        if self.partner_local {
            return false;
        }
        let err = CoreError::PartnerLost { player: self.local.other(), cause: cause.to_string() };
        warn!(trial = self.machine.trial_index(), %err, role = ?self.role, "continuing with artificial partner");
        self.partner_local = true;
        self.role = Role::Host;
        if let Err(err) = self.enter_fallback() {
            warn!(%err, "connection state out of order");
        }
        self.deferred.clear();
        self.outbox.clear();
        true
    }

    /// `in-trial → disconnected → fallback`, through the transition table.
    fn enter_fallback(&mut self) -> Result<()> {
        if self.connection != ConnectionState::Disconnected {
            self.set_connection(ConnectionState::Disconnected)?;
        }
        self.set_connection(ConnectionState::Fallback)
    }

    pub fn drain_outbox(&mut self) -> Vec<WireMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn set_ready(&mut self, ready: bool) {
        if self.has_remote() {
            self.outbox.push(WireMessage::ReadyStatus { player: self.local, ready });
        }
        info!(player = %self.local, ready, "ready status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::GridConfig;
    use crate::engine::geometry::Position;
    use crate::engine::placement::GoalCondition;
    use crate::engine::trial::{ExperimentType, TrialDesign};

    fn machine() -> TrialMachine {
        let mut m = TrialMachine::new(
            4,
            &TrialDesign::fallback(ExperimentType::TwoP2G),
            &GridConfig::default(),
            GoalCondition::default(),
        )
        .unwrap();
        m.start(0);
        m
    }

    fn engine(local: PlayerId, role: Role, mode: SyncMode) -> SyncEngine {
        let mut cfg = SyncConfig::default();
        cfg.move_throttle_ms = 100;
        SyncEngine::new(local, role, mode, cfg, machine(), false)
    }

    fn proposal(player: PlayerId, seq: u32, direction: Direction) -> WireMessage {
        WireMessage::MoveProposal { id: MoveId { player, trial: 4, seq }, direction, sent_at_ms: 0 }
    }

    #[test]
    fn test_connection_transitions() {
        let mut e = engine(PlayerId::Player1, Role::Host, SyncMode::FreeRealTime);
        assert!(e.set_connection(ConnectionState::Paired).is_err());
        for s in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::RoomJoining,
            ConnectionState::Paired,
            ConnectionState::InTrial,
            ConnectionState::Paired,
            ConnectionState::InTrial,
            ConnectionState::Disconnected,
            ConnectionState::Fallback,
        ] {
            e.set_connection(s).unwrap();
        }
        assert_eq!(e.connection(), ConnectionState::Fallback);
    }

    #[test]
    fn test_mode_selection() {
        let sync = SyncConfig::default();
        let agent = AgentConfig::default();
        assert_eq!(SyncMode::select(&sync, &agent, true), SyncMode::FreeRealTime);
        assert_eq!(SyncMode::select(&sync, &agent, false), SyncMode::TurnLocked);
    }

    #[test]
    fn test_throttle() {
        let mut e = engine(PlayerId::Player1, Role::Host, SyncMode::FreeRealTime);
        assert!(e.local_input(Direction::Up, 1000).is_ok());
        assert_eq!(e.local_input(Direction::Up, 1050), Err(MoveRejection::Throttled));
        assert!(e.local_input(Direction::Up, 1100).is_ok());
    }

    #[test]
    fn test_free_mode_broadcasts_local_move() {
        let mut e = engine(PlayerId::Player2, Role::Guest, SyncMode::FreeRealTime);
        let outcome = e.local_input(Direction::Left, 10).unwrap().unwrap();
        assert_eq!(outcome.step_count, 1);
        let out = e.drain_outbox();
        assert!(matches!(out.as_slice(), [WireMessage::MoveProposal { id, .. }] if id.player == PlayerId::Player2));
    }

    #[test]
    fn test_duplicate_remote_move_applied_once() {
        let mut e = engine(PlayerId::Player1, Role::Host, SyncMode::FreeRealTime);
        let msg = proposal(PlayerId::Player2, 0, Direction::Left);
        assert!(matches!(e.handle_message(msg.clone(), 500).unwrap(), Some(SyncEvent::MoveApplied(_))));
        assert_eq!(e.handle_message(msg, 520).unwrap(), None);
        assert_eq!(e.machine().state().step_count, 1);
        assert_eq!(e.machine().state().player2, Some(Position::new(7, 11)));
    }

    #[test]
    fn test_remote_move_deferred_in_protection_window() {
        let mut e = engine(PlayerId::Player1, Role::Host, SyncMode::FreeRealTime);
        e.local_input(Direction::Right, 1000).unwrap();
        let ev = e.handle_message(proposal(PlayerId::Player2, 0, Direction::Left), 1100).unwrap();
        assert!(matches!(ev, Some(SyncEvent::MoveDeferred(_))));
        assert_eq!(e.machine().state().step_count, 1);

        assert!(e.tick(1200).is_empty());
        let applied = e.tick(1300);
        assert_eq!(applied.len(), 1);
        assert_eq!(e.machine().state().step_count, 2);
    }

    #[test]
    fn test_guest_skips_snapshot_while_protected() {
        let mut host = engine(PlayerId::Player1, Role::Host, SyncMode::FreeRealTime);
        let mut guest = engine(PlayerId::Player2, Role::Guest, SyncMode::FreeRealTime);
        host.local_input(Direction::Right, 0).unwrap();
        let snap = host.drain_outbox().into_iter().find(|m| matches!(m, WireMessage::FullStateSnapshot { .. })).unwrap();

        guest.local_input(Direction::Left, 100).unwrap();
        assert_eq!(guest.handle_message(snap.clone(), 200).unwrap(), None);
        assert_eq!(guest.machine().state().player1, Position::new(7, 2));

        let ev = guest.handle_message(snap.clone(), 500).unwrap();
        assert!(matches!(ev, Some(SyncEvent::StateReplaced { .. })));
        assert_eq!(guest.machine().state().player1, Position::new(7, 3));
        // Same revision again: ignored.
        assert_eq!(guest.handle_message(snap, 900).unwrap(), None);
    }

    fn split(outbox: Vec<WireMessage>) -> (WireMessage, WireMessage) {
        let proposal = outbox.iter().find(|m| matches!(m, WireMessage::MoveProposal { .. })).cloned().unwrap();
        let snap = outbox.into_iter().find(|m| matches!(m, WireMessage::FullStateSnapshot { .. })).unwrap();
        (proposal, snap)
    }

    #[test]
    fn test_snapshot_before_proposal_applies_move_once() {
        let mut host = engine(PlayerId::Player1, Role::Host, SyncMode::FreeRealTime);
        let mut guest = engine(PlayerId::Player2, Role::Guest, SyncMode::FreeRealTime);
        host.local_input(Direction::Right, 0).unwrap();
        let (proposal, snap) = split(host.drain_outbox());

        // Delivered out of order: the snapshot already holds the move.
        let ev = guest.handle_message(snap, 500).unwrap();
        assert!(matches!(ev, Some(SyncEvent::StateReplaced { .. })));
        assert_eq!(guest.handle_message(proposal, 600).unwrap(), None);

        let s = guest.machine().state();
        assert_eq!(s.step_count, 1);
        assert_eq!(s.player1, Position::new(7, 3));
        assert_eq!(s.tracks[0].actions.len(), 1);
    }

    #[test]
    fn test_snapshot_drops_deferred_copy_of_move() {
        let mut host = engine(PlayerId::Player1, Role::Host, SyncMode::FreeRealTime);
        let mut guest = engine(PlayerId::Player2, Role::Guest, SyncMode::FreeRealTime);
        host.local_input(Direction::Right, 0).unwrap();
        let (proposal, snap) = split(host.drain_outbox());

        guest.local_input(Direction::Left, 1000).unwrap();
        let ev = guest.handle_message(proposal, 1100).unwrap();
        assert!(matches!(ev, Some(SyncEvent::MoveDeferred(_))));
        let ev = guest.handle_message(snap, 1400).unwrap();
        assert!(matches!(ev, Some(SyncEvent::StateReplaced { .. })));

        assert!(guest.tick(1500).is_empty());
        let s = guest.machine().state();
        assert_eq!(s.player1, Position::new(7, 3));
        assert_eq!(s.tracks[0].actions.len(), 1);
    }

    #[test]
    fn test_proposal_then_snapshot_still_converges() {
        let mut host = engine(PlayerId::Player1, Role::Host, SyncMode::FreeRealTime);
        let mut guest = engine(PlayerId::Player2, Role::Guest, SyncMode::FreeRealTime);
        host.local_input(Direction::Right, 0).unwrap();
        let (proposal, snap) = split(host.drain_outbox());

        assert!(matches!(guest.handle_message(proposal, 500).unwrap(), Some(SyncEvent::MoveApplied(_))));
        guest.handle_message(snap, 600).unwrap();
        assert_eq!(guest.machine().state().step_count, 1);
        assert_eq!(guest.machine().state().player1, Position::new(7, 3));
    }

    #[test]
    fn test_partner_loss_walks_through_disconnected() {
        let mut e = engine(PlayerId::Player2, Role::Guest, SyncMode::TurnLocked);
        for s in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::RoomJoining,
            ConnectionState::Paired,
        ] {
            e.set_connection(s).unwrap();
        }
        e.start(0);
        assert_eq!(e.connection(), ConnectionState::InTrial);
        assert!(!ConnectionState::InTrial.can_transition(ConnectionState::Fallback));

        assert!(e.partner_lost("transport closed"));
        assert_eq!(e.connection(), ConnectionState::Fallback);
    }

    #[test]
    fn test_turn_locked_host_waits_for_both() {
        let mut host = engine(PlayerId::Player1, Role::Host, SyncMode::TurnLocked);
        assert_eq!(host.local_input(Direction::Right, 0).unwrap(), None);
        assert!(host.awaiting(PlayerId::Player2));
        assert!(!host.awaiting(PlayerId::Player1));
        assert_eq!(host.local_input(Direction::Up, 200), Err(MoveRejection::AwaitingTurn));

        let ev = host.handle_message(proposal(PlayerId::Player2, 0, Direction::Left), 300).unwrap();
        let Some(SyncEvent::MoveApplied(outcome)) = ev else { panic!("turn should resolve") };
        assert_eq!(outcome.step_count, 1);
        assert_eq!(outcome.effects.len(), 2);
        assert!(host.drain_outbox().iter().any(|m| matches!(m, WireMessage::FullStateSnapshot { .. })));
    }

    #[test]
    fn test_turn_locked_guest_never_resolves() {
        let mut guest = engine(PlayerId::Player2, Role::Guest, SyncMode::TurnLocked);
        assert_eq!(guest.local_input(Direction::Left, 0).unwrap(), None);
        assert_eq!(guest.handle_message(proposal(PlayerId::Player1, 0, Direction::Right), 10).unwrap(), None);
        assert_eq!(guest.machine().state().step_count, 0);
        assert_eq!(guest.local_input(Direction::Left, 500), Err(MoveRejection::AwaitingTurn));
    }

    #[test]
    fn test_snapshot_from_other_trial_is_desync() {
        let mut guest = engine(PlayerId::Player2, Role::Guest, SyncMode::TurnLocked);
        let mut other = TrialMachine::new(
            9,
            &TrialDesign::fallback(ExperimentType::TwoP2G),
            &GridConfig::default(),
            GoalCondition::default(),
        )
        .unwrap();
        other.start(0);
        let msg = WireMessage::FullStateSnapshot {
            snapshot: Box::new(other.snapshot()),
            applied_seq: [None, None],
            sent_at_ms: 0,
        };
        let err = guest.handle_message(msg, 0).unwrap_err();
        assert!(matches!(err, CoreError::ProtocolDesync(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_partner_loss_promotes_guest() {
        let mut guest = engine(PlayerId::Player2, Role::Guest, SyncMode::TurnLocked);
        let ev = guest.handle_message(WireMessage::PartnerDisconnect { player: PlayerId::Player1 }, 0).unwrap();
        assert_eq!(ev, Some(SyncEvent::PartnerLost(PlayerId::Player1)));
        assert_eq!(guest.role(), Role::Host);
        assert_eq!(guest.connection(), ConnectionState::Fallback);
        assert!(!guest.partner_lost("again"));

        // Now resolves turns itself with the partner slot local.
        assert_eq!(guest.local_input(Direction::Left, 10).unwrap(), None);
        let outcome = guest.partner_input(Direction::Right, 20).unwrap().unwrap();
        assert_eq!(outcome.step_count, 1);
        assert!(guest.drain_outbox().is_empty());
    }
}
