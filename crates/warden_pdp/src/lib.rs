//! WARDEN Policy Decision Point
//!
//! The orchestration layer: combining algorithms, the policy retrieval
//! point holding the current canonical index snapshot, and the reactive
//! decision pipeline turning authorization subscriptions into continuous
//! decision streams.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod combining;
pub mod config;
pub mod pipeline;
pub mod retrieval;

// Re-exports
pub use combining::CombiningAlgorithm;
pub use config::PdpConfig;
pub use pipeline::{DecisionStream, PdpBuilder, PolicyDecisionPoint};
pub use retrieval::{InMemoryPolicySource, PolicyRetrievalPoint, PolicySource, PolicyUpdate};
