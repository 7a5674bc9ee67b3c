//! Partner kinds and the artificial partner controller.
//!
//! The partner kind is resolved once per trial. An artificial partner asks,
//! in order: the external provider (if any), the cached joint policy, the
//! greedy step, and finally a uniform draw.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::cache::PolicyCache;
use super::greedy::greedy_step;
use super::sampling::sample_action;
use crate::engine::config::FallbackPartner;
use crate::engine::geometry::{Direction, PlayerId};
use crate::engine::trial::TrialSnapshot;
use crate::error::CoreError;
use crate::sync::provider::{request_decision, DecisionProvider, ProviderReply};

#[derive(Clone)]
pub enum PartnerKind {
    Human,
    Greedy,
    JointPolicy,
    ExternalProvider(Arc<dyn DecisionProvider>),
}

impl PartnerKind {
    pub fn is_artificial(&self) -> bool {
        !matches!(self, PartnerKind::Human)
    }

    pub fn uses_joint_policy(&self) -> bool {
        matches!(self, PartnerKind::JointPolicy | PartnerKind::ExternalProvider(_))
    }

    pub fn label(&self) -> &str {
        match self {
            PartnerKind::Human => "human",
            PartnerKind::Greedy => "greedy",
            PartnerKind::JointPolicy => "joint",
            PartnerKind::ExternalProvider(p) => p.name(),
        }
    }
}

impl From<FallbackPartner> for PartnerKind {
    fn from(fallback: FallbackPartner) -> Self {
        match fallback {
            FallbackPartner::JointPolicy => PartnerKind::JointPolicy,
            FallbackPartner::Greedy => PartnerKind::Greedy,
        }
    }
}

impl fmt::Debug for PartnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartnerKind::ExternalProvider(p) => write!(f, "ExternalProvider({})", p.name()),
            other => f.write_str(other.label()),
        }
    }
}

impl FromStr for PartnerKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(PartnerKind::Human),
            "greedy" => Ok(PartnerKind::Greedy),
            "joint" | "rl_joint" => Ok(PartnerKind::JointPolicy),
            other => Err(CoreError::InvalidConfig(format!("unknown partner kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Provider,
    JointPolicy,
    Greedy,
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentDecision {
    pub player: PlayerId,
    /// `None` when the partner has nothing to do (already on a goal).
    pub direction: Option<Direction>,
    pub source: DecisionSource,
}

/// Drives one player slot with an artificial policy.
pub struct ArtificialPartner {
    player: PlayerId,
    kind: PartnerKind,
    cache: Arc<PolicyCache>,
    rng: ChaCha8Rng,
    decision_timeout: Duration,
    took_over: bool,
}

impl ArtificialPartner {
    pub fn new(
        player: PlayerId,
        kind: PartnerKind,
        cache: Arc<PolicyCache>,
        seed: u64,
        decision_timeout: Duration,
    ) -> Self {
        Self { player, kind, cache, rng: ChaCha8Rng::seed_from_u64(seed), decision_timeout, took_over: false }
    }

    /// Replacement for a lost participant.
    pub fn takeover(
        player: PlayerId,
        fallback: FallbackPartner,
        cache: Arc<PolicyCache>,
        seed: u64,
        decision_timeout: Duration,
    ) -> Self {
        info!(%player, ?fallback, "artificial partner taking over");
        let mut partner = Self::new(player, fallback.into(), cache, seed, decision_timeout);
        partner.took_over = true;
        partner
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn kind(&self) -> &PartnerKind {
        &self.kind
    }

    pub fn took_over(&self) -> bool {
        self.took_over
    }

    /// Solves (or fetches) the policy for the snapshot's goal set on the
    /// calling thread.
    pub fn prepare(&self, snapshot: &TrialSnapshot) {
        if self.kind.uses_joint_policy() {
            self.cache.get_or_solve(&snapshot.goal_positions());
        }
    }

    /// Background solve for a goal set that just changed.
    pub fn prewarm(&self, snapshot: &TrialSnapshot) -> Option<tokio::task::JoinHandle<()>> {
        if self.kind.uses_joint_policy() {
            self.cache.prewarm(&snapshot.goal_positions())
        } else {
            None
        }
    }

    /// Synchronous decision (no provider call).
    pub fn decide(&mut self, snapshot: &TrialSnapshot) -> AgentDecision {
        if snapshot.is_at_goal(self.player) || snapshot.position(self.player).is_none() {
            return AgentDecision { player: self.player, direction: None, source: DecisionSource::Greedy };
        }
        if self.kind.uses_joint_policy() {
            if let Some(decision) = self.joint_decision(snapshot) {
                return decision;
            }
        }
        self.greedy_decision(snapshot)
    }

    /// Full decision path. Provider failure or timeout hands the slot to the
    /// joint policy for the rest of the trial.
    pub async fn decide_async(&mut self, snapshot: &TrialSnapshot) -> AgentDecision {
        let provider = match &self.kind {
            PartnerKind::ExternalProvider(provider) if !snapshot.is_at_goal(self.player) => Arc::clone(provider),
            _ => return self.decide(snapshot),
        };
        let reply = request_decision(provider.as_ref(), snapshot.clone(), self.player, self.decision_timeout).await;
        match reply {
            ProviderReply::Decided(direction) => {
                AgentDecision { player: self.player, direction: Some(direction), source: DecisionSource::Provider }
            }
            ProviderReply::Declined => self.decide(snapshot),
            ProviderReply::Failed(_) | ProviderReply::TimedOut => {
                let err = CoreError::PartnerLost {
                    player: self.player,
                    cause: format!("decision provider {} unusable", provider.name()),
                };
                warn!(trial = snapshot.trial_index, %err, "switching to joint policy");
                self.kind = PartnerKind::JointPolicy;
                self.took_over = true;
                self.decide(snapshot)
            }
        }
    }

    fn joint_decision(&mut self, snapshot: &TrialSnapshot) -> Option<AgentDecision> {
        let own = snapshot.position(self.player)?;
        let other = snapshot.position(self.player.other())?;

        let policy = match self.cache.get(&snapshot.goal_positions()) {
            Ok(policy) => policy,
            Err(err) => {
                warn!(trial = snapshot.trial_index, player = %self.player, %err, "using greedy fallback");
                return None;
            }
        };
        // The policy is indexed (human, agent): the other slot plays the human role.
        let Some(dist) = policy.distribution(other, own) else {
            debug!(trial = snapshot.trial_index, "joint state not covered by policy");
            return None;
        };
        let direction = sample_action(&dist, &mut self.rng);
        Some(AgentDecision { player: self.player, direction: Some(direction), source: DecisionSource::JointPolicy })
    }

    fn greedy_decision(&mut self, snapshot: &TrialSnapshot) -> AgentDecision {
        let greedy = snapshot.position(self.player).and_then(|pos| greedy_step(pos, &snapshot.goals));
        match greedy {
            Some(direction) => {
                AgentDecision { player: self.player, direction: Some(direction), source: DecisionSource::Greedy }
            }
            None => {
                let direction = Direction::ALL[self.rng.gen_range(0..Direction::ALL.len())];
                AgentDecision { player: self.player, direction: Some(direction), source: DecisionSource::Uniform }
            }
        }
    }
}
