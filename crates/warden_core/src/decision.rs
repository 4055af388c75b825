//! Authorization decisions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The four possible outcomes of an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Access granted
    Permit,
    /// Access denied
    Deny,
    /// Evaluation could not produce a definite outcome
    Indeterminate,
    /// No policy applied to the request
    NotApplicable,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permit => write!(f, "PERMIT"),
            Self::Deny => write!(f, "DENY"),
            Self::Indeterminate => write!(f, "INDETERMINATE"),
            Self::NotApplicable => write!(f, "NOT_APPLICABLE"),
        }
    }
}

/// A decision together with its constraint payload.
///
/// Immutable value type; the `with_*` methods produce modified copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    /// The decision kind
    pub decision: Decision,
    /// Optional replacement resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Json>,
    /// Obligations the enforcement point must fulfill
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Json>,
    /// Advice the enforcement point should consider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advice: Vec<Json>,
}

impl AuthorizationDecision {
    /// Bare decision of the given kind, no constraints
    #[must_use]
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            resource: None,
            obligations: Vec::new(),
            advice: Vec::new(),
        }
    }

    /// PERMIT without constraints
    #[must_use]
    pub fn permit() -> Self {
        Self::new(Decision::Permit)
    }

    /// DENY without constraints
    #[must_use]
    pub fn deny() -> Self {
        Self::new(Decision::Deny)
    }

    /// INDETERMINATE
    #[must_use]
    pub fn indeterminate() -> Self {
        Self::new(Decision::Indeterminate)
    }

    /// NOT_APPLICABLE
    #[must_use]
    pub fn not_applicable() -> Self {
        Self::new(Decision::NotApplicable)
    }

    /// Set the replacement resource
    #[must_use]
    pub fn with_resource(mut self, resource: Json) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Append an obligation
    #[must_use]
    pub fn with_obligation(mut self, obligation: Json) -> Self {
        self.obligations.push(obligation);
        self
    }

    /// Append advice
    #[must_use]
    pub fn with_advice(mut self, advice: Json) -> Self {
        self.advice.push(advice);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::Permit.to_string(), "PERMIT");
        assert_eq!(Decision::NotApplicable.to_string(), "NOT_APPLICABLE");
    }

    #[test]
    fn test_decision_serde_round_trip() {
        for decision in [
            Decision::Permit,
            Decision::Deny,
            Decision::Indeterminate,
            Decision::NotApplicable,
        ] {
            let encoded = serde_json::to_string(&decision).unwrap();
            let decoded: Decision = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decision, decoded);
        }
        assert_eq!(
            serde_json::to_string(&Decision::NotApplicable).unwrap(),
            "\"NOT_APPLICABLE\""
        );
    }

    #[test]
    fn test_authorization_decision_builders() {
        let decision = AuthorizationDecision::permit()
            .with_obligation(json!({"type": "log"}))
            .with_advice(json!({"type": "notify"}))
            .with_resource(json!({"filtered": true}));

        assert_eq!(decision.decision, Decision::Permit);
        assert_eq!(decision.obligations.len(), 1);
        assert_eq!(decision.advice.len(), 1);
        assert_eq!(decision.resource, Some(json!({"filtered": true})));
    }

    #[test]
    fn test_authorization_decision_round_trip() {
        let decision = AuthorizationDecision::deny().with_obligation(json!("audit"));
        let encoded = serde_json::to_string(&decision).unwrap();
        let decoded: AuthorizationDecision = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decision, decoded);
    }

    #[test]
    fn test_bare_payload_omitted_from_encoding() {
        let encoded = serde_json::to_string(&AuthorizationDecision::not_applicable()).unwrap();
        assert_eq!(encoded, "{\"decision\":\"NOT_APPLICABLE\"}");
    }
}
