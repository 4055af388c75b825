//! Combining algorithms.
//!
//! A combining algorithm is a pure function from the decisions of the
//! individual policies to one aggregate decision. Constraint payloads
//! accumulate only from decisions that contributed to the final outcome.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use warden_core::{AuthorizationDecision, Decision};

/// Named strategy reducing multiple policies' decisions to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombiningAlgorithm {
    /// Any Deny wins, then Indeterminate, then Permit
    #[default]
    DenyOverrides,
    /// Any Permit wins, then Indeterminate, then Deny
    PermitOverrides,
    /// First non-NotApplicable decision in document order
    FirstApplicable,
    /// Exactly one policy may be applicable
    OnlyOneApplicable,
}

impl CombiningAlgorithm {
    /// Combine the individual decisions into one aggregate decision.
    ///
    /// The input order is the policy document order, which is significant
    /// for `FirstApplicable`. An empty input yields NOT_APPLICABLE.
    #[must_use]
    pub fn combine(&self, decisions: &[AuthorizationDecision]) -> AuthorizationDecision {
        match self {
            Self::DenyOverrides => overrides(decisions, Decision::Deny, Decision::Permit),
            Self::PermitOverrides => overrides(decisions, Decision::Permit, Decision::Deny),
            Self::FirstApplicable => decisions
                .iter()
                .find(|d| d.decision != Decision::NotApplicable)
                .cloned()
                .unwrap_or_else(AuthorizationDecision::not_applicable),
            Self::OnlyOneApplicable => {
                let mut applicable =
                    decisions.iter().filter(|d| d.decision != Decision::NotApplicable);
                match (applicable.next(), applicable.next()) {
                    (None, _) => AuthorizationDecision::not_applicable(),
                    (Some(only), None) => only.clone(),
                    (Some(_), Some(_)) => AuthorizationDecision::indeterminate(),
                }
            }
        }
    }
}

/// Shared skeleton of the overrides strategies: `winner` beats
/// Indeterminate, Indeterminate beats `loser`, `loser` beats
/// NotApplicable.
fn overrides(
    decisions: &[AuthorizationDecision],
    winner: Decision,
    loser: Decision,
) -> AuthorizationDecision {
    if decisions.iter().any(|d| d.decision == winner) {
        return merge(winner, decisions);
    }
    if decisions.iter().any(|d| d.decision == Decision::Indeterminate) {
        return AuthorizationDecision::indeterminate();
    }
    if decisions.iter().any(|d| d.decision == loser) {
        return merge(loser, decisions);
    }
    AuthorizationDecision::not_applicable()
}

/// Merge the constraint payloads of every decision of the winning kind.
///
/// More than one contributing resource transformation is a conflict the
/// engine cannot resolve, so the aggregate collapses to INDETERMINATE.
fn merge(kind: Decision, decisions: &[AuthorizationDecision]) -> AuthorizationDecision {
    let mut merged = AuthorizationDecision::new(kind);
    for decision in decisions.iter().filter(|d| d.decision == kind) {
        merged.obligations.extend(decision.obligations.iter().cloned());
        merged.advice.extend(decision.advice.iter().cloned());
        if let Some(resource) = &decision.resource {
            if merged.resource.is_some() {
                return AuthorizationDecision::indeterminate();
            }
            merged.resource = Some(resource.clone());
        }
    }
    merged
}

impl fmt::Display for CombiningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DenyOverrides => "deny-overrides",
            Self::PermitOverrides => "permit-overrides",
            Self::FirstApplicable => "first-applicable",
            Self::OnlyOneApplicable => "only-one-applicable",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for CombiningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny-overrides" => Ok(Self::DenyOverrides),
            "permit-overrides" => Ok(Self::PermitOverrides),
            "first-applicable" => Ok(Self::FirstApplicable),
            "only-one-applicable" => Ok(Self::OnlyOneApplicable),
            other => Err(format!("unknown combining algorithm: '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn permit() -> AuthorizationDecision {
        AuthorizationDecision::permit()
    }

    fn deny() -> AuthorizationDecision {
        AuthorizationDecision::deny()
    }

    fn indeterminate() -> AuthorizationDecision {
        AuthorizationDecision::indeterminate()
    }

    fn not_applicable() -> AuthorizationDecision {
        AuthorizationDecision::not_applicable()
    }

    #[test]
    fn test_deny_overrides_table() {
        let algorithm = CombiningAlgorithm::DenyOverrides;
        assert_eq!(
            algorithm.combine(&[permit(), deny(), not_applicable()]).decision,
            Decision::Deny
        );
        assert_eq!(
            algorithm.combine(&[permit(), not_applicable()]).decision,
            Decision::Permit
        );
        assert_eq!(
            algorithm.combine(&[indeterminate(), permit()]).decision,
            Decision::Indeterminate
        );
        assert_eq!(algorithm.combine(&[]).decision, Decision::NotApplicable);
    }

    #[test]
    fn test_permit_overrides_symmetry() {
        let algorithm = CombiningAlgorithm::PermitOverrides;
        assert_eq!(
            algorithm.combine(&[deny(), permit(), not_applicable()]).decision,
            Decision::Permit
        );
        assert_eq!(
            algorithm.combine(&[deny(), not_applicable()]).decision,
            Decision::Deny
        );
        assert_eq!(
            algorithm.combine(&[indeterminate(), deny()]).decision,
            Decision::Indeterminate
        );
    }

    #[test]
    fn test_first_applicable_takes_document_order() {
        let algorithm = CombiningAlgorithm::FirstApplicable;
        let combined = algorithm.combine(&[
            not_applicable(),
            deny().with_obligation(json!("audit")),
            permit(),
        ]);
        assert_eq!(combined.decision, Decision::Deny);
        assert_eq!(combined.obligations, vec![json!("audit")]);

        assert_eq!(
            algorithm.combine(&[not_applicable(), not_applicable()]).decision,
            Decision::NotApplicable
        );
    }

    #[test]
    fn test_only_one_applicable() {
        let algorithm = CombiningAlgorithm::OnlyOneApplicable;
        assert_eq!(algorithm.combine(&[not_applicable()]).decision, Decision::NotApplicable);
        assert_eq!(
            algorithm.combine(&[not_applicable(), permit()]).decision,
            Decision::Permit
        );
        assert_eq!(
            algorithm.combine(&[permit(), deny()]).decision,
            Decision::Indeterminate
        );
    }

    #[test]
    fn test_obligations_accumulate_from_contributors_only() {
        let combined = CombiningAlgorithm::DenyOverrides.combine(&[
            permit().with_obligation(json!("ignored")),
            deny().with_obligation(json!("first")),
            deny().with_obligation(json!("second")),
        ]);
        assert_eq!(combined.decision, Decision::Deny);
        assert_eq!(combined.obligations, vec![json!("first"), json!("second")]);
    }

    #[test]
    fn test_conflicting_transformations_collapse() {
        let combined = CombiningAlgorithm::PermitOverrides.combine(&[
            permit().with_resource(json!({"v": 1})),
            permit().with_resource(json!({"v": 2})),
        ]);
        assert_eq!(combined.decision, Decision::Indeterminate);

        let single = CombiningAlgorithm::PermitOverrides.combine(&[
            permit().with_resource(json!({"v": 1})),
            permit(),
        ]);
        assert_eq!(single.decision, Decision::Permit);
        assert_eq!(single.resource, Some(json!({"v": 1})));
    }

    #[test]
    fn test_name_round_trip() {
        for algorithm in [
            CombiningAlgorithm::DenyOverrides,
            CombiningAlgorithm::PermitOverrides,
            CombiningAlgorithm::FirstApplicable,
            CombiningAlgorithm::OnlyOneApplicable,
        ] {
            let name = algorithm.to_string();
            assert_eq!(name.parse::<CombiningAlgorithm>().unwrap(), algorithm);
        }
        assert!("popularity-contest".parse::<CombiningAlgorithm>().is_err());
    }
}
