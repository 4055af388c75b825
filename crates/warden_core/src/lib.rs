//! WARDEN Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Values, decisions and subscriptions are serializable so they can cross
//! the collaborator boundary as plain JSON.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decision;
pub mod error;
pub mod subscription;
pub mod value;
pub mod variables;

// Re-exports
pub use decision::{AuthorizationDecision, Decision};
pub use error::{EngineError, EngineResult};
pub use subscription::AuthorizationSubscription;
pub use value::{Trace, Val, hash_json, json_type_name};
pub use variables::VariableContext;
