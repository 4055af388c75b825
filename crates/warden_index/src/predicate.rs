//! Shared predicates of the canonical index.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;

use warden_core::Val;
use warden_lang::{EvaluationContext, Expression};

use crate::bitmask::Bitmask;

/// An indivisible boolean sub-expression shared across clauses and
/// policies.
///
/// Immutable once compiled. The three masks are precomputed at policy-set
/// compile time: `conjunctions` lists every clause the predicate occurs in,
/// `false_for_true` the clauses eliminated when it evaluates to true (the
/// occurrence is negated there), and `false_for_false` the clauses
/// eliminated when it evaluates to false.
#[derive(Debug, Clone)]
pub struct Predicate {
    expression: Arc<Expression>,
    imports: Arc<HashMap<String, String>>,
    conjunctions: Bitmask,
    false_for_true: Bitmask,
    false_for_false: Bitmask,
}

impl Predicate {
    /// Compiled predicate with its clause masks
    #[must_use]
    pub fn new(
        expression: Arc<Expression>,
        imports: Arc<HashMap<String, String>>,
        conjunctions: Bitmask,
        false_for_true: Bitmask,
        false_for_false: Bitmask,
    ) -> Self {
        Self {
            expression,
            imports,
            conjunctions,
            false_for_true,
            false_for_false,
        }
    }

    /// The underlying expression
    #[must_use]
    pub fn expression(&self) -> &Arc<Expression> {
        &self.expression
    }

    /// Clauses this predicate occurs in
    #[must_use]
    pub fn conjunctions(&self) -> &Bitmask {
        &self.conjunctions
    }

    /// Clauses eliminated when the predicate is true
    #[must_use]
    pub fn false_for_true(&self) -> &Bitmask {
        &self.false_for_true
    }

    /// Clauses eliminated when the predicate is false
    #[must_use]
    pub fn false_for_false(&self) -> &Bitmask {
        &self.false_for_false
    }

    /// Evaluate the predicate against the request context.
    ///
    /// Targets must not suspend, so evaluation is synchronous. Anything
    /// other than a defined boolean counts as an evaluation failure and
    /// yields `None`.
    #[must_use]
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Option<bool> {
        let scoped = ctx.with_imports(self.imports.clone());
        match self.expression.evaluate_once(&scoped) {
            Val::Value(Json::Bool(outcome)) => Some(outcome),
            _ => None,
        }
    }
}

/// A predicate plus the ordering facts a
/// [`crate::ordering::PredicateOrderStrategy`] ranks by.
#[derive(Debug, Clone)]
pub struct PredicateInfo {
    /// The compiled predicate
    pub predicate: Arc<Predicate>,
    /// Number of clauses referencing the predicate
    pub clause_count: usize,
    /// Interning order, used as a deterministic tie-break
    pub creation_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_core::VariableContext;
    use warden_lang::{AttributeRegistry, FunctionLibrary};

    fn ctx(variables: VariableContext) -> EvaluationContext {
        EvaluationContext::new(
            variables,
            Arc::new(AttributeRegistry::new()),
            Arc::new(FunctionLibrary::new()),
        )
    }

    fn predicate(expr: Expression) -> Predicate {
        Predicate::new(
            Arc::new(expr),
            Arc::new(HashMap::new()),
            Bitmask::new(),
            Bitmask::new(),
            Bitmask::new(),
        )
    }

    #[test]
    fn test_boolean_outcome() {
        let mut variables = VariableContext::new();
        variables.put("flag", serde_json::json!(true)).unwrap();

        let p = predicate(Expression::var("flag"));
        assert_eq!(p.evaluate(&ctx(variables)), Some(true));
    }

    #[test]
    fn test_non_boolean_is_failure() {
        let p = predicate(Expression::literal(serde_json::json!(42)));
        assert_eq!(p.evaluate(&ctx(VariableContext::new())), None);
    }

    #[test]
    fn test_attribute_in_target_is_failure() {
        let p = predicate(Expression::attribute("env.clock", vec![]));
        assert_eq!(p.evaluate(&ctx(VariableContext::new())), None);
    }
}
