//! Brute-force reference matcher.
//!
//! Evaluates every policy's target directly. The canonical index must
//! produce results identical in membership; tests hold the two against
//! each other.

use std::sync::Arc;

use serde_json::Value as Json;

use warden_core::Val;
use warden_lang::{EvaluationContext, Policy};

use crate::container::PolicyRetrievalResult;

/// Match by evaluating every target, no indexing.
#[must_use]
pub fn naive_match(policies: &[Arc<Policy>], ctx: &EvaluationContext) -> PolicyRetrievalResult {
    let mut matched = Vec::new();
    let mut error_occurred = false;
    for policy in policies {
        let scoped = ctx.with_imports(Arc::new(policy.imports.clone()));
        match policy.target.evaluate_once(&scoped) {
            Val::Value(Json::Bool(true)) => matched.push(policy.clone()),
            Val::Value(Json::Bool(false)) => {}
            _ => error_occurred = true,
        }
    }
    PolicyRetrievalResult {
        policies: matched,
        error_occurred,
    }
}
