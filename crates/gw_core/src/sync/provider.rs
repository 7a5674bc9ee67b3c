//! External decision providers (e.g. a language-model agent) for the
//! artificial partner. The engine owns timeouts and fallback; a provider only
//! answers one question per call.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::engine::geometry::{Direction, PlayerId};
use crate::engine::trial::TrialSnapshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Direction>, ProviderError>> + Send + 'a>>;

pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Next move for `player`, or `None` to decline.
    fn propose_action(&self, snapshot: TrialSnapshot, player: PlayerId) -> ProviderFuture<'_>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReply {
    Decided(Direction),
    Declined,
    Failed(ProviderError),
    TimedOut,
}

impl ProviderReply {
    /// Failures and timeouts count as losing the partner; a decline does not.
    pub fn is_partner_loss(&self) -> bool {
        matches!(self, ProviderReply::Failed(_) | ProviderReply::TimedOut)
    }
}

/// Calls the provider under `budget`.
pub async fn request_decision(
    provider: &dyn DecisionProvider,
    snapshot: TrialSnapshot,
    player: PlayerId,
    budget: Duration,
) -> ProviderReply {
    let trial = snapshot.trial_index;
    match tokio::time::timeout(budget, provider.propose_action(snapshot, player)).await {
        Ok(Ok(Some(direction))) => ProviderReply::Decided(direction),
        Ok(Ok(None)) => ProviderReply::Declined,
        Ok(Err(err)) => {
            warn!(trial, provider = provider.name(), %err, "decision provider failed");
            ProviderReply::Failed(err)
        }
        Err(_) => {
            warn!(trial, provider = provider.name(), budget_ms = budget.as_millis() as u64, "decision provider timed out");
            ProviderReply::TimedOut
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers after `delay` with a fixed reply; counts calls.
    pub struct ScriptedProvider {
        pub reply: Result<Option<Direction>, ProviderError>,
        pub delay: Duration,
        pub calls: AtomicU32,
    }

    impl ScriptedProvider {
        pub fn new(reply: Result<Option<Direction>, ProviderError>, delay: Duration) -> Self {
            Self { reply, delay, calls: AtomicU32::new(0) }
        }
    }

    impl DecisionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn propose_action(&self, _snapshot: TrialSnapshot, _player: PlayerId) -> ProviderFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply.clone();
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                reply
            })
        }
    }
}
