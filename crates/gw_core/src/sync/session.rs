//! # Trial Session
//!
//! Async driver around [`SyncEngine`]. One `select!` loop per trial waits on
//! local input, the transport and the trial's timers; each wake-up runs to
//! completion before the next is taken, so the trial is only ever touched from
//! this loop.
//!
//! When the peer disappears (closed transport, failed send, or an explicit
//! disconnect message) the partner slot is handed to an artificial partner
//! and its movement loops are armed on the spot. The trial keeps running.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::message::WireMessage;
use super::protocol::{ConnectionState, Role, SyncEngine, SyncEvent, SyncMode};
use super::timers::{TimerEvent, TimerKind, TrialTimers};
use super::transport::Transport;
use crate::engine::config::ExperimentConfig;
use crate::engine::experiment::{FallbackIncident, TrialRecord};
use crate::engine::geometry::{Direction, PlayerId};
use crate::engine::placement::GoalPlacementSolver;
use crate::engine::policy::{greedy_step, ArtificialPartner, PartnerKind, PolicyCache};
use crate::engine::trial::{TrialMachine, TrialPhase, TrialSnapshot};
use crate::error::{CoreError, Result};

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

pub struct SessionSetup<T> {
    pub local: PlayerId,
    pub role: Role,
    /// `Human` means the partner sits behind `transport`.
    pub partner: PartnerKind,
    pub transport: Option<T>,
    pub seed: u64,
}

pub struct TrialSession<T: Transport> {
    engine: SyncEngine,
    transport: Option<T>,
    config: ExperimentConfig,
    cache: Arc<PolicyCache>,
    placer: GoalPlacementSolver,
    partner: Option<ArtificialPartner>,
    rng: ChaCha8Rng,
    seed: u64,
    epoch: Instant,
    snapshots: watch::Sender<TrialSnapshot>,
    published: Option<(u32, u64)>,
    incidents: Vec<FallbackIncident>,
}

impl<T: Transport> TrialSession<T> {
    pub fn new(
        setup: SessionSetup<T>,
        config: ExperimentConfig,
        cache: Arc<PolicyCache>,
        machine: TrialMachine,
    ) -> Result<Self> {
        let partner_is_human = !setup.partner.is_artificial();
        if partner_is_human && setup.transport.is_none() {
            return Err(CoreError::InvalidConfig("a human partner needs a transport".into()));
        }

        let mode = SyncMode::select(&config.sync, &config.agent, partner_is_human);
        let mut engine =
            SyncEngine::new(setup.local, setup.role, mode, config.sync.clone(), machine, !partner_is_human);
        if !partner_is_human && setup.transport.is_some() {
            engine.attach_observer();
        }
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::RoomJoining,
            ConnectionState::Paired,
        ] {
            engine.set_connection(state)?;
        }

        let partner = (!partner_is_human).then(|| {
            ArtificialPartner::new(
                setup.local.other(),
                setup.partner.clone(),
                Arc::clone(&cache),
                setup.seed.wrapping_add(1),
                ms(config.sync.decision_timeout_ms),
            )
        });
        let (snapshots, _) = watch::channel(engine.snapshot());

        info!(local = %setup.local, role = ?setup.role, ?mode, partner = setup.partner.label(), "session ready");
        Ok(Self {
            engine,
            transport: setup.transport,
            placer: GoalPlacementSolver::new(config.placement.clone()),
            config,
            cache,
            partner,
            rng: ChaCha8Rng::seed_from_u64(setup.seed),
            seed: setup.seed,
            epoch: Instant::now(),
            snapshots,
            published: None,
            incidents: Vec::new(),
        })
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Snapshot feed for renderers; updated after every accepted mutation.
    pub fn subscribe(&self) -> watch::Receiver<TrialSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn partner_label(&self) -> String {
        self.partner.as_ref().map_or_else(|| "human".to_string(), |p| p.kind().label().to_string())
    }

    /// Loads the next trial; [`Self::run`] plays it.
    pub fn load_trial(&mut self, machine: TrialMachine) {
        self.engine.begin_trial(machine);
        self.publish();
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn publish(&mut self) {
        let snapshot = self.engine.snapshot();
        let key = (snapshot.trial_index, snapshot.revision);
        if self.published == Some(key) {
            return;
        }
        self.published = Some(key);
        self.snapshots.send_replace(snapshot);
    }

    // ========================================================================
    // Trial loop
    // ========================================================================

    /// Plays the loaded trial to completion.
    pub async fn run(&mut self, inputs: &mut mpsc::Receiver<Direction>) -> Result<TrialRecord> {
        let started_at = Utc::now();
        let trial = self.engine.machine().trial_index();
        self.incidents.clear();

        // New trial, new goal layout.
        self.cache.clear();
        self.prepare_partner().await;

        let now = self.now_ms();
        self.engine.start(now);
        self.publish();

        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
        let mut timers = TrialTimers::new(trial, timer_tx);
        timers.every(TimerKind::GoalCheck, ms(self.config.sync.goal_check_interval_ms));
        if self.config.sync.trial_timeout_ms > 0 {
            timers.after(TimerKind::GameTimeout, ms(self.config.sync.trial_timeout_ms));
        }
        self.arm_partner_loops(&mut timers);
        self.flush(&mut timers).await;

        let mut inputs_open = true;
        while !self.engine.is_complete() {
            tokio::select! {
                input = inputs.recv(), if inputs_open => match input {
                    Some(direction) => self.on_local_input(direction).await,
                    None => {
                        debug!(trial, "local input closed");
                        inputs_open = false;
                    }
                },
                Some(message) = recv_from(self.transport.as_mut()) => match message {
                    Some(message) => self.on_message(message, &mut timers).await,
                    None => self.take_over("transport closed", &mut timers).await,
                },
                Some(event) = timer_rx.recv() => self.on_timer(event).await,
            }
            self.flush(&mut timers).await;
        }

        timers.cancel_all();
        self.engine.end_trial();
        self.publish();

        let snapshot = self.engine.snapshot();
        let record = TrialRecord::new(snapshot, self.partner_label(), started_at, std::mem::take(&mut self.incidents));
        info!(
            trial,
            outcome = ?record.outcome,
            steps = record.steps,
            fallbacks = record.fallback_incidents.len(),
            "trial recorded"
        );
        Ok(record)
    }

    async fn prepare_partner(&self) {
        let Some(partner) = &self.partner else { return };
        if let Some(task) = partner.prewarm(&self.engine.snapshot()) {
            if let Err(err) = task.await {
                warn!(%err, "policy pre-warm failed");
            }
        }
    }

    fn arm_partner_loops(&self, timers: &mut TrialTimers) {
        if self.partner.is_none() {
            return;
        }
        match self.engine.mode() {
            SyncMode::FreeRealTime => timers.every(TimerKind::AgentMove, ms(self.config.agent.free_move_interval_ms)),
            SyncMode::TurnLocked => {
                timers.every(TimerKind::IndependentMove, ms(self.config.agent.independent_delay_ms))
            }
        }
    }

    async fn on_local_input(&mut self, direction: Direction) {
        let now = self.now_ms();
        match self.engine.local_input(direction, now) {
            Ok(Some(_)) => self.publish(),
            Ok(None) => {}
            Err(reason) => {
                debug!(%reason, %direction, "local input ignored");
                return;
            }
        }

        let partner = self.engine.local_player().other();
        if self.partner.is_some() && self.engine.awaiting(partner) {
            let delay = self.config.agent.sync_delay_ms;
            if delay > 0 {
                tokio::time::sleep(ms(delay)).await;
            }
            self.partner_move().await;
        }
    }

    async fn partner_move(&mut self) {
        let snapshot = self.engine.snapshot();
        let Some(partner) = self.partner.as_mut() else { return };
        let player = partner.player();
        let was_fallback = partner.took_over();
        let decision = partner.decide_async(&snapshot).await;
        let switched = !was_fallback && partner.took_over();

        if switched {
            self.incidents.push(FallbackIncident {
                player,
                at_step: snapshot.step_count,
                cause: "decision provider unavailable".to_string(),
            });
        }
        let Some(direction) = decision.direction else { return };

        let now = self.now_ms();
        match self.engine.partner_input(direction, now) {
            Ok(Some(_)) => self.publish(),
            Ok(None) => {}
            Err(reason) => debug!(%reason, source = ?decision.source, "partner move ignored"),
        }
    }

    async fn on_message(&mut self, message: WireMessage, timers: &mut TrialTimers) {
        let now = self.now_ms();
        let event = message.event_name();
        match self.engine.handle_message(message, now) {
            Ok(Some(SyncEvent::MoveApplied(_))) | Ok(Some(SyncEvent::StateReplaced { .. })) => self.publish(),
            Ok(Some(SyncEvent::MoveDeferred(id))) => debug!(seq = id.seq, "remote move deferred"),
            Ok(Some(SyncEvent::TrialCompleted(outcome))) => debug!(?outcome, "peer reported completion"),
            Ok(Some(SyncEvent::PartnerReady { player, ready })) => debug!(%player, ready, "peer ready status"),
            Ok(Some(SyncEvent::PartnerLost(_))) => {
                self.transport = None;
                self.install_fallback("peer announced disconnect", timers).await;
            }
            Ok(None) => {}
            Err(err) => warn!(event, %err, recoverable = err.is_recoverable(), "inbound message dropped"),
        }
    }

    async fn on_timer(&mut self, event: TimerEvent) {
        if event.trial != self.engine.machine().trial_index() {
            debug!(stale = event.trial, "timer event from a finished trial");
            return;
        }
        let now = self.now_ms();
        match event.kind {
            TimerKind::GoalCheck => {
                if !self.engine.tick(now).is_empty() {
                    self.publish();
                }
                if self.engine.evaluate_new_goal(&self.placer, &mut self.rng, now).is_some() {
                    self.publish();
                    if let Some(partner) = &self.partner {
                        if partner.prewarm(&self.engine.snapshot()).is_some() {
                            debug!("pre-warming policy for the new goal set");
                        }
                    }
                }
            }
            TimerKind::AgentMove => self.partner_move().await,
            TimerKind::IndependentMove => {
                let local = self.engine.local_player();
                if !self.engine.awaiting(local) && self.engine.awaiting(local.other()) {
                    self.partner_move().await;
                }
            }
            TimerKind::GameTimeout => {
                if self.engine.expire(now) {
                    self.publish();
                }
            }
        }
    }

    async fn flush(&mut self, timers: &mut TrialTimers) {
        let messages = self.engine.drain_outbox();
        let Some(transport) = self.transport.as_ref() else { return };
        let failure = messages.into_iter().find_map(|m| transport.send(m).err());
        if let Some(err) = failure {
            self.take_over(&err.to_string(), timers).await;
        }
    }

    async fn take_over(&mut self, cause: &str, timers: &mut TrialTimers) {
        self.transport = None;
        if self.engine.partner_lost(cause) {
            self.install_fallback(cause, timers).await;
        } else {
            debug!(cause, "observer link closed");
        }
    }

    async fn install_fallback(&mut self, cause: &str, timers: &mut TrialTimers) {
        if self.partner.is_some() {
            return;
        }
        let player = self.engine.local_player().other();
        let trial = self.engine.machine().trial_index();
        let partner = ArtificialPartner::takeover(
            player,
            self.config.sync.fallback_partner,
            Arc::clone(&self.cache),
            self.seed.wrapping_add(u64::from(trial) + 1),
            ms(self.config.sync.decision_timeout_ms),
        );
        let snapshot = self.engine.snapshot();
        // Greedy moves cover the gap until the background solve lands.
        if partner.prewarm(&snapshot).is_some() {
            debug!(trial, "pre-warming fallback policy");
        }
        self.partner = Some(partner);
        self.incidents.push(FallbackIncident { player, at_step: snapshot.step_count, cause: cause.to_string() });
        self.arm_partner_loops(timers);

        // The local player may already be waiting on the lost partner's turn.
        let local = self.engine.local_player();
        if self.engine.awaiting(player) && !self.engine.awaiting(local) {
            self.partner_move().await;
        }
    }
}

async fn recv_from<T: Transport>(transport: Option<&mut T>) -> Option<Option<WireMessage>> {
    match transport {
        Some(transport) => Some(transport.recv().await),
        None => pending().await,
    }
}

/// Scripted participant: walks `player` greedily towards the nearest goal,
/// at most one input per step and no faster than `pace`.
pub async fn drive_greedy(
    mut snapshots: watch::Receiver<TrialSnapshot>,
    player: PlayerId,
    inputs: mpsc::Sender<Direction>,
    pace: Duration,
) {
    let mut last_sent: Option<(u32, u32)> = None;
    loop {
        tokio::time::sleep(pace).await;
        let next = {
            let snapshot = snapshots.borrow_and_update();
            let step = (snapshot.trial_index, snapshot.step_count);
            if snapshot.phase == TrialPhase::Running && last_sent != Some(step) {
                snapshot
                    .position(player)
                    .and_then(|pos| greedy_step(pos, &snapshot.goals))
                    .map(|direction| (step, direction))
            } else {
                None
            }
        };
        if let Some((step, direction)) = next {
            if inputs.send(direction).await.is_err() {
                return;
            }
            last_sent = Some(step);
        }
        match tokio::time::timeout(pace.max(ms(1)) * 4, snapshots.changed()).await {
            Ok(Ok(())) => {}
            // Nothing happened: the input may have been throttled, offer it again.
            Err(_) => last_sent = None,
            Ok(Err(_)) => return,
        }
    }
}
