//! Authorization subscriptions.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A request for a continuous stream of authorization decisions.
///
/// Each component is an arbitrary structured value; absent components are
/// JSON null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSubscription {
    /// Who is asking
    pub subject: Json,
    /// What they want to do
    pub action: Json,
    /// What they want to do it to
    pub resource: Json,
    /// Context of the request
    #[serde(default)]
    pub environment: Json,
}

impl AuthorizationSubscription {
    /// Subscription without environment data
    #[must_use]
    pub fn new(subject: impl Into<Json>, action: impl Into<Json>, resource: impl Into<Json>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
            environment: Json::Null,
        }
    }

    /// Set the environment component
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<Json>) -> Self {
        self.environment = environment.into();
        self
    }
}
