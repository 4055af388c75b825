//! Policy documents.
//!
//! The policy source collaborator supplies fully parsed policies: identity,
//! target formula, body expression tree, constraint payloads, and the
//! import map under which the expressions were written. The engine never
//! parses text itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use warden_core::Decision;

use crate::expression::Expression;

/// The effect a policy grants when its body evaluates to true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    /// Policy grants access
    Permit,
    /// Policy denies access
    Deny,
}

impl Entitlement {
    /// The decision this entitlement maps to when the policy applies
    #[must_use]
    pub fn decision(self) -> Decision {
        match self {
            Self::Permit => Decision::Permit,
            Self::Deny => Decision::Deny,
        }
    }
}

/// A single parsed policy.
///
/// The target decides applicability to a request and must be evaluable
/// without attribute access; the body may open attribute streams. A policy
/// without an explicit target or body behaves as if it were `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy name; identity within a policy set
    pub name: String,
    /// Effect when the policy applies
    pub entitlement: Entitlement,
    /// Applicability condition
    pub target: Expression,
    /// Condition evaluated against live attribute data
    pub body: Expression,
    /// Obligations attached to the decision when the policy applies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Json>,
    /// Advice attached to the decision when the policy applies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advice: Vec<Json>,
    /// Optional replacement resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Json>,
    /// Import aliases the expressions were written under
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub imports: HashMap<String, String>,
}

impl Policy {
    /// Policy with `true` target and body and no constraints
    #[must_use]
    pub fn new(name: impl Into<String>, entitlement: Entitlement) -> Self {
        Self {
            name: name.into(),
            entitlement,
            target: Expression::literal(true),
            body: Expression::literal(true),
            obligations: Vec::new(),
            advice: Vec::new(),
            transformation: None,
            imports: HashMap::new(),
        }
    }

    /// Set the target formula
    #[must_use]
    pub fn with_target(mut self, target: Expression) -> Self {
        self.target = target;
        self
    }

    /// Set the body expression
    #[must_use]
    pub fn with_body(mut self, body: Expression) -> Self {
        self.body = body;
        self
    }

    /// Append an obligation payload
    #[must_use]
    pub fn with_obligation(mut self, obligation: Json) -> Self {
        self.obligations.push(obligation);
        self
    }

    /// Append an advice payload
    #[must_use]
    pub fn with_advice(mut self, advice: Json) -> Self {
        self.advice.push(advice);
        self
    }

    /// Set the replacement resource
    #[must_use]
    pub fn with_transformation(mut self, transformation: Json) -> Self {
        self.transformation = Some(transformation);
        self
    }

    /// Register an import alias
    #[must_use]
    pub fn with_import(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.imports.insert(alias.into(), target.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_to_true_target_and_body() {
        let policy = Policy::new("p1", Entitlement::Permit);
        assert_eq!(policy.target, Expression::literal(true));
        assert_eq!(policy.body, Expression::literal(true));
        assert!(policy.obligations.is_empty());
    }

    #[test]
    fn test_entitlement_decisions() {
        assert_eq!(Entitlement::Permit.decision(), Decision::Permit);
        assert_eq!(Entitlement::Deny.decision(), Decision::Deny);
    }

    #[test]
    fn test_builders() {
        let policy = Policy::new("audit", Entitlement::Deny)
            .with_target(Expression::var("subject"))
            .with_obligation(json!({"type": "log"}))
            .with_import("len", "standard.length");

        assert_eq!(policy.target, Expression::var("subject"));
        assert_eq!(policy.obligations, vec![json!({"type": "log"})]);
        assert_eq!(policy.imports.get("len").unwrap(), "standard.length");
    }

    #[test]
    fn test_serde_round_trip() {
        let policy = Policy::new("p", Entitlement::Permit)
            .with_target(Expression::var("flag"))
            .with_transformation(json!({"redacted": true}));
        let encoded = serde_json::to_string(&policy).unwrap();
        let decoded: Policy = serde_json::from_str(&encoded).unwrap();
        assert_eq!(policy, decoded);
    }
}
