//! Artificial partner: joint value-iteration policy, its cache, the greedy
//! fallback and the controller that picks between them.

mod cache;
mod greedy;
mod joint;
mod partner;
mod sampling;

pub use cache::{CacheStats, GoalSetKey, PendingSolve, PolicyCache};
pub use greedy::greedy_step;
pub use joint::{JointPolicy, JointPolicySolver, JOINT_ACTIONS};
pub use partner::{AgentDecision, ArtificialPartner, DecisionSource, PartnerKind};
pub use sampling::{sample_action, softmax};
