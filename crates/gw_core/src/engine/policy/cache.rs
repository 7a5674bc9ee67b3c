//! Policy cache keyed by canonical goal set.
//!
//! Solve once per goal set; the key is order-independent. A slot is either
//! `Solving` (a pre-warm is running on the blocking pool) or `Ready`. A
//! `Solving` slot is owned by a [`PendingSolve`]; if that is dropped before
//! it finishes (panic, aborted task) the slot is released so the next
//! pre-warm can retry.

use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::joint::{JointPolicy, JointPolicySolver};
use crate::engine::geometry::Position;
use crate::error::{CoreError, Result};

// ============================================================================
// GoalSetKey
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GoalSetKey {
    size: usize,
    goals: Vec<Position>,
}

impl GoalSetKey {
    pub fn new(size: usize, goals: &[Position]) -> Self {
        let mut goals = goals.to_vec();
        goals.sort();
        goals.dedup();
        Self { size, goals }
    }

    /// Stable 64-bit id, used in logs and error messages.
    pub fn fingerprint(&self) -> u64 {
        fxhash::hash64(self)
    }

    pub fn goals(&self) -> &[Position] {
        &self.goals
    }
}

// ============================================================================
// PolicyCache
// ============================================================================

enum Slot {
    /// Ticket of the reservation that owns the slot.
    Solving(u64),
    Ready(Arc<JointPolicy>),
}

#[derive(Default)]
struct CacheInner {
    slots: FxHashMap<GoalSetKey, Slot>,
    order: VecDeque<GoalSetKey>,
    hits: u64,
    misses: u64,
    solves: u64,
    next_ticket: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub solves: u64,
}

pub struct PolicyCache {
    solver: JointPolicySolver,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl PolicyCache {
    pub fn new(solver: JointPolicySolver, capacity: usize) -> Self {
        Self { solver, capacity: capacity.max(1), inner: Mutex::new(CacheInner::default()) }
    }

    pub fn solver(&self) -> &JointPolicySolver {
        &self.solver
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn key(&self, goals: &[Position]) -> GoalSetKey {
        GoalSetKey::new(self.solver.size(), goals)
    }

    /// Ready policy for `goals`, without solving.
    pub fn get(&self, goals: &[Position]) -> Result<Arc<JointPolicy>> {
        let key = self.key(goals);
        let mut inner = self.lock();
        match inner.slots.get(&key) {
            Some(Slot::Ready(policy)) => {
                let policy = Arc::clone(policy);
                inner.hits += 1;
                Ok(policy)
            }
            _ => {
                inner.misses += 1;
                Err(CoreError::SolverUnavailable { fingerprint: key.fingerprint() })
            }
        }
    }

    /// Cached policy, solving on the calling thread when absent.
    pub fn get_or_solve(&self, goals: &[Position]) -> Arc<JointPolicy> {
        if let Ok(policy) = self.get(goals) {
            return policy;
        }
        let key = self.key(goals);
        let policy = Arc::new(self.solver.solve(key.goals()));
        self.insert(key, Arc::clone(&policy));
        policy
    }

    /// Starts a background solve for `goals` unless one is cached or running.
    /// Without a tokio runtime the solve happens inline.
    pub fn prewarm(self: &Arc<Self>, goals: &[Position]) -> Option<tokio::task::JoinHandle<()>> {
        let pending = self.reserve(self.key(goals))?;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            pending.solve();
            return None;
        };

        debug!(fingerprint = pending.key.fingerprint(), "pre-warming joint policy");
        Some(handle.spawn_blocking(move || pending.solve()))
    }

    /// Marks `key` as solving. `None` if it is already cached or running.
    pub fn reserve(self: &Arc<Self>, key: GoalSetKey) -> Option<PendingSolve> {
        let mut inner = self.lock();
        if inner.slots.contains_key(&key) {
            return None;
        }
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.slots.insert(key.clone(), Slot::Solving(ticket));
        Some(PendingSolve { cache: Arc::clone(self), key, ticket, done: false })
    }

    fn insert(&self, key: GoalSetKey, policy: Arc<JointPolicy>) {
        let mut inner = self.lock();
        inner.solves += 1;
        if !inner.order.contains(&key) {
            inner.order.push_back(key.clone());
        }
        inner.slots.insert(key, Slot::Ready(policy));

        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                debug!(fingerprint = old.fingerprint(), "evicting joint policy");
                inner.slots.remove(&old);
            }
        }
    }

    /// Drops every entry. Called when a new trial starts.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let pending = inner.slots.values().filter(|s| matches!(s, Slot::Solving(_))).count();
        if pending > 0 {
            warn!(pending, "clearing policy cache with solves still running");
        }
        inner.slots.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats { entries: inner.slots.len(), hits: inner.hits, misses: inner.misses, solves: inner.solves }
    }
}

// ============================================================================
// PendingSolve
// ============================================================================

/// Reservation on a `Solving` slot.
pub struct PendingSolve {
    cache: Arc<PolicyCache>,
    key: GoalSetKey,
    ticket: u64,
    done: bool,
}

impl PendingSolve {
    pub fn key(&self) -> &GoalSetKey {
        &self.key
    }

    /// Solves on the current thread and fills the slot.
    pub fn solve(self) {
        let policy = Arc::new(self.cache.solver.solve(self.key.goals()));
        self.finish(policy);
    }

    pub fn finish(mut self, policy: Arc<JointPolicy>) {
        self.done = true;
        self.cache.insert(self.key.clone(), policy);
    }
}

impl Drop for PendingSolve {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = self.cache.lock();
        if matches!(inner.slots.get(&self.key), Some(Slot::Solving(t)) if *t == self.ticket) {
            inner.slots.remove(&self.key);
            warn!(fingerprint = self.key.fingerprint(), "policy solve abandoned, slot released");
        }
    }
}
