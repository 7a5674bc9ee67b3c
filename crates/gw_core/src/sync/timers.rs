//! Per-trial timers as one cancelable set.
//!
//! Every event is tagged with the trial it was armed for; the driver drops
//! events whose trial is no longer current. Dropping the set aborts all of
//! its tasks.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Poll for the shared-goal trigger.
    GoalCheck,
    /// Artificial partner's free-mode move.
    AgentMove,
    /// Partner keeps walking after the local player reached a goal.
    IndependentMove,
    GameTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub trial: u32,
    pub kind: TimerKind,
}

pub struct TrialTimers {
    trial: u32,
    tx: mpsc::UnboundedSender<TimerEvent>,
    tasks: Vec<(TimerKind, JoinHandle<()>)>,
}

impl TrialTimers {
    pub fn new(trial: u32, tx: mpsc::UnboundedSender<TimerEvent>) -> Self {
        Self { trial, tx, tasks: Vec::new() }
    }

    pub fn trial(&self) -> u32 {
        self.trial
    }

    /// Repeating timer; the first event fires one `period` from now.
    /// Re-arming a kind replaces the running one.
    pub fn every(&mut self, kind: TimerKind, period: Duration) {
        self.cancel(kind);
        if period.is_zero() {
            return;
        }
        let tx = self.tx.clone();
        let event = TimerEvent { trial: self.trial, kind };
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        self.tasks.push((kind, task));
    }

    /// One-shot timer.
    pub fn after(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        let tx = self.tx.clone();
        let event = TimerEvent { trial: self.trial, kind };
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
        self.tasks.push((kind, task));
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.tasks.iter().any(|(k, t)| *k == kind && !t.is_finished())
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.tasks.retain(|(k, task)| {
            if *k == kind {
                task.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&mut self) {
        if !self.tasks.is_empty() {
            debug!(trial = self.trial, timers = self.tasks.len(), "cancelling trial timers");
        }
        for (_, task) in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TrialTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
