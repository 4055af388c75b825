//! The compiled canonical index and its match operation.

use std::sync::Arc;

use warden_lang::{EvaluationContext, Policy};

use crate::bitmask::Bitmask;
use crate::compiler::MatchingMode;
use crate::predicate::Predicate;

/// Reverse-map entry: when a clause is satisfied, the clause at
/// `clause_index` loses `count` of the formulas referencing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CTuple {
    /// Index of the affected clause
    pub clause_index: usize,
    /// Number of shared formulas
    pub count: u32,
}

/// Outcome of a match operation.
#[derive(Debug, Clone)]
pub struct PolicyRetrievalResult {
    /// Matched policies in document order
    pub policies: Vec<Arc<Policy>>,
    /// True if any predicate evaluation failed during the match
    pub error_occurred: bool,
}

impl PolicyRetrievalResult {
    /// Names of the matched policies, in document order
    #[must_use]
    pub fn policy_names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Immutable compiled snapshot of the policy set's target formulas.
///
/// Holds the fixed predicate evaluation order, the clause and formula
/// relationship tables, and the reverse map driving orphan elimination.
/// Rebuilt wholesale on any policy-set change; a snapshot is never mutated,
/// so concurrent match operations can share it freely. All per-request
/// state lives in caller-local arrays inside [`Self::match_request`].
#[derive(Debug)]
pub struct CanonicalIndexContainer {
    mode: MatchingMode,
    /// Fixed evaluation order
    predicate_order: Vec<Arc<Predicate>>,
    /// Clause index -> formulas containing the clause
    related_formulas: Vec<Vec<usize>>,
    /// Formula index -> indices into `policies`
    formula_policies: Vec<Vec<usize>>,
    /// All successfully compiled policies, in document order
    policies: Vec<Arc<Policy>>,
    /// Reverse map for orphan elimination
    referencing: Vec<Vec<CTuple>>,
    /// Clause index -> literal count
    literals_in_clause: Vec<u32>,
    /// Clause index -> number of formulas containing the clause
    formulas_with_clause: Vec<u32>,
}

impl CanonicalIndexContainer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mode: MatchingMode,
        predicate_order: Vec<Arc<Predicate>>,
        related_formulas: Vec<Vec<usize>>,
        formula_policies: Vec<Vec<usize>>,
        policies: Vec<Arc<Policy>>,
        referencing: Vec<Vec<CTuple>>,
        literals_in_clause: Vec<u32>,
        formulas_with_clause: Vec<u32>,
    ) -> Self {
        Self {
            mode,
            predicate_order,
            related_formulas,
            formula_policies,
            policies,
            referencing,
            literals_in_clause,
            formulas_with_clause,
        }
    }

    /// Empty index matching nothing
    #[must_use]
    pub fn empty() -> Self {
        Self::new(
            MatchingMode::default(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    /// The policies served by this snapshot, in document order
    #[must_use]
    pub fn policies(&self) -> &[Arc<Policy>] {
        &self.policies
    }

    /// Number of interned predicates
    #[must_use]
    pub fn predicate_count(&self) -> usize {
        self.predicate_order.len()
    }

    /// Determine which policies' targets are satisfied by the request.
    ///
    /// Single monotone pass over the fixed predicate order. Each predicate
    /// is evaluated at most once; predicates no clause needs any more are
    /// skipped. Membership of the result is identical to evaluating every
    /// formula's normal form naively.
    #[must_use]
    pub fn match_request(&self, ctx: &EvaluationContext) -> PolicyRetrievalResult {
        let clause_count = self.literals_in_clause.len();
        let mut candidates = Bitmask::all_set(clause_count);
        let mut satisfied = Bitmask::with_len(clause_count);
        let mut true_literals = vec![0u32; clause_count];
        let mut eliminated_formulas = vec![0u32; clause_count];
        let mut error_occurred = false;

        for predicate in &self.predicate_order {
            if !predicate.conjunctions().intersects(&candidates) {
                continue;
            }

            let Some(outcome) = predicate.evaluate(ctx) else {
                match self.mode {
                    MatchingMode::AbortOnError => {
                        return PolicyRetrievalResult {
                            policies: self.fetch_policies(&satisfied),
                            error_occurred: true,
                        };
                    }
                    MatchingMode::BestEffort => {
                        // Clauses needing this predicate can no longer be
                        // decided; they stop contributing.
                        candidates.and_not(predicate.conjunctions());
                        error_occurred = true;
                        continue;
                    }
                }
            };

            let satisfiable =
                self.find_satisfiable(&candidates, predicate, outcome, &mut true_literals);
            satisfied.or(&satisfiable);

            let unsatisfiable = self.find_unsatisfiable(&candidates, predicate, outcome);
            let orphaned =
                self.find_orphaned(&candidates, &satisfiable, &mut eliminated_formulas);

            candidates.and_not(&unsatisfiable);
            candidates.and_not(&satisfiable);
            candidates.and_not(&orphaned);
        }

        PolicyRetrievalResult {
            policies: self.fetch_policies(&satisfied),
            error_occurred,
        }
    }

    /// Clauses among the candidates that the outcome renders unsatisfiable.
    fn find_unsatisfiable(
        &self,
        candidates: &Bitmask,
        predicate: &Predicate,
        outcome: bool,
    ) -> Bitmask {
        let mut result = candidates.clone();
        if outcome {
            result.and(predicate.false_for_true());
        } else {
            result.and(predicate.false_for_false());
        }
        result
    }

    /// Clauses whose literal over this predicate is satisfied as written,
    /// and which became fully satisfied by it.
    fn find_satisfiable(
        &self,
        candidates: &Bitmask,
        predicate: &Predicate,
        outcome: bool,
        true_literals: &mut [u32],
    ) -> Bitmask {
        // The negated outcome selects exactly the clauses whose literal
        // agrees with the actual outcome.
        let hits = self.find_unsatisfiable(candidates, predicate, !outcome);
        let mut result = Bitmask::with_len(true_literals.len());
        hits.for_each_set_bit(|clause| {
            true_literals[clause] += 1;
            if true_literals[clause] == self.literals_in_clause[clause] {
                result.set(clause);
            }
        });
        result
    }

    /// Clauses that can no longer affect any live formula because every
    /// formula referencing them was decided by a newly satisfied clause.
    fn find_orphaned(
        &self,
        candidates: &Bitmask,
        satisfiable: &Bitmask,
        eliminated_formulas: &mut [u32],
    ) -> Bitmask {
        let mut result = Bitmask::with_len(eliminated_formulas.len());
        satisfiable.for_each_set_bit(|clause| {
            for ctuple in &self.referencing[clause] {
                if !candidates.is_set(ctuple.clause_index) {
                    continue;
                }
                eliminated_formulas[ctuple.clause_index] += ctuple.count;
                if eliminated_formulas[ctuple.clause_index]
                    == self.formulas_with_clause[ctuple.clause_index]
                {
                    result.set(ctuple.clause_index);
                }
            }
        });
        result
    }

    /// Union of the policies mapped by every formula containing a
    /// satisfied clause, in document order.
    fn fetch_policies(&self, satisfied: &Bitmask) -> Vec<Arc<Policy>> {
        let mut included = vec![false; self.policies.len()];
        satisfied.for_each_set_bit(|clause| {
            for &formula in &self.related_formulas[clause] {
                for &policy in &self.formula_policies[formula] {
                    included[policy] = true;
                }
            }
        });
        included
            .iter()
            .enumerate()
            .filter(|&(_, &hit)| hit)
            .map(|(index, _)| self.policies[index].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{IndexCompiler, MatchingMode};
    use crate::ordering::PredicateOrderStrategy;
    use crate::predicate::PredicateInfo;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use warden_core::VariableContext;
    use warden_lang::{
        AttributeRegistry, Comparator, Entitlement, Expression, FunctionLibrary, Policy,
    };

    fn ctx_with(variables: VariableContext, functions: FunctionLibrary) -> EvaluationContext {
        EvaluationContext::new(
            variables,
            Arc::new(AttributeRegistry::new()),
            Arc::new(functions),
        )
    }

    fn ctx_with_vars(assignments: &[(&str, serde_json::Value)]) -> EvaluationContext {
        let mut variables = VariableContext::new();
        for (name, value) in assignments {
            variables.put(*name, value.clone()).unwrap();
        }
        ctx_with(variables, FunctionLibrary::new())
    }

    fn age_policy(name: &str) -> Arc<Policy> {
        Arc::new(Policy::new(name, Entitlement::Permit).with_target(Expression::compare(
            Comparator::Gt,
            Expression::var("age"),
            Expression::literal(json!(18)),
        )))
    }

    /// Orders predicates by the position of a marker string in their debug
    /// representation. Lets tests pin the evaluation order.
    struct FixedOrder(Vec<&'static str>);

    impl PredicateOrderStrategy for FixedOrder {
        fn create_order(&self, mut predicates: Vec<PredicateInfo>) -> Vec<Arc<Predicate>> {
            predicates.sort_by_key(|info| {
                let repr = format!("{:?}", info.predicate.expression());
                self.0
                    .iter()
                    .position(|marker| repr.contains(marker))
                    .unwrap_or(usize::MAX)
            });
            predicates.into_iter().map(|info| info.predicate).collect()
        }
    }

    #[test]
    fn test_shared_clause_scenario() {
        // Two policies share the clause `age > 18`; the predicate is
        // interned once.
        let policies = vec![age_policy("first"), age_policy("second")];
        let compiled = IndexCompiler::new(MatchingMode::BestEffort).compile(&policies);
        assert!(compiled.errors.is_empty());
        assert_eq!(compiled.container.predicate_count(), 1);

        let minor = compiled
            .container
            .match_request(&ctx_with_vars(&[("age", json!(17))]));
        assert!(minor.policies.is_empty());
        assert!(!minor.error_occurred);

        let adult = compiled
            .container
            .match_request(&ctx_with_vars(&[("age", json!(21))]));
        assert_eq!(adult.policy_names(), vec!["first", "second"]);
        assert!(!adult.error_occurred);
    }

    #[test]
    fn test_match_preserves_document_order() {
        let policies = vec![age_policy("zebra"), age_policy("aardvark")];
        let compiled = IndexCompiler::new(MatchingMode::BestEffort).compile(&policies);
        let result = compiled
            .container
            .match_request(&ctx_with_vars(&[("age", json!(30))]));
        assert_eq!(result.policy_names(), vec!["zebra", "aardvark"]);
    }

    #[test]
    fn test_idempotent_against_unchanged_snapshot() {
        let policies = vec![
            age_policy("first"),
            Arc::new(
                Policy::new("flagged", Entitlement::Deny).with_target(Expression::var("flag")),
            ),
        ];
        let compiled = IndexCompiler::new(MatchingMode::BestEffort).compile(&policies);
        let ctx = ctx_with_vars(&[("age", json!(20)), ("flag", json!(false))]);

        let first = compiled.container.match_request(&ctx);
        let second = compiled.container.match_request(&ctx);
        assert_eq!(first.policy_names(), second.policy_names());
        assert_eq!(first.error_occurred, second.error_occurred);
    }

    #[test]
    fn test_abort_on_error_reports_progress_so_far() {
        // The failing predicate (a non-boolean target) is interned after
        // the healthy one, so the healthy formula completes first.
        let healthy = Arc::new(
            Policy::new("healthy", Entitlement::Permit).with_target(Expression::literal(true)),
        );
        let broken = Arc::new(
            Policy::new("broken", Entitlement::Permit)
                .with_target(Expression::literal(json!(42))),
        );

        let compiled = IndexCompiler::new(MatchingMode::AbortOnError)
            .with_strategy(Arc::new(FixedOrder(vec!["Bool(true)", "Number(42)"])))
            .compile(&[healthy.clone(), broken.clone()]);
        let result = compiled.container.match_request(&ctx_with_vars(&[]));
        assert!(result.error_occurred);
        assert_eq!(result.policy_names(), vec!["healthy"]);

        // Reverse the order: the failure hits before anything is satisfied.
        let compiled = IndexCompiler::new(MatchingMode::AbortOnError)
            .with_strategy(Arc::new(FixedOrder(vec!["Number(42)", "Bool(true)"])))
            .compile(&[healthy, broken]);
        let result = compiled.container.match_request(&ctx_with_vars(&[]));
        assert!(result.error_occurred);
        assert!(result.policies.is_empty());
    }

    #[test]
    fn test_best_effort_matches_unaffected_formulas() {
        let broken = Arc::new(
            Policy::new("broken", Entitlement::Permit)
                .with_target(Expression::literal(json!(42))),
        );
        let healthy = Arc::new(
            Policy::new("healthy", Entitlement::Permit).with_target(Expression::var("flag")),
        );

        let compiled = IndexCompiler::new(MatchingMode::BestEffort)
            .with_strategy(Arc::new(FixedOrder(vec!["Number(42)", "flag"])))
            .compile(&[broken, healthy]);
        let result = compiled
            .container
            .match_request(&ctx_with_vars(&[("flag", json!(true))]));
        assert!(result.error_occurred);
        assert_eq!(result.policy_names(), vec!["healthy"]);
    }

    #[test]
    fn test_orphaned_clauses_skip_predicate_evaluation() {
        // Target a || (probe() && c): once `a` satisfies the formula, the
        // second clause is orphaned and the probe must never run.
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_probe = calls.clone();
        let functions = FunctionLibrary::new().with_function("probe.count", move |_args| {
            calls_probe.fetch_add(1, Ordering::SeqCst);
            warden_core::Val::of_bool(true)
        });

        let policy = Arc::new(
            Policy::new("short-circuit", Entitlement::Permit).with_target(Expression::or(
                Expression::var("a"),
                Expression::and(Expression::function("probe.count", vec![]), Expression::var("c")),
            )),
        );

        let compiled = IndexCompiler::new(MatchingMode::BestEffort)
            .with_strategy(Arc::new(FixedOrder(vec!["Variable(\"a\")", "probe", "Variable(\"c\")"])))
            .compile(&[policy]);

        let mut variables = VariableContext::new();
        variables.put("a", json!(true)).unwrap();
        variables.put("c", json!(true)).unwrap();
        let result = compiled
            .container
            .match_request(&ctx_with(variables, functions));

        assert_eq!(result.policy_names(), vec!["short-circuit"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "probe predicate must be pruned");
    }

    #[test]
    fn test_unreferenced_predicates_are_skipped() {
        // Unsatisfiable elimination: once `a` is false, the clause {a, b}
        // cannot be satisfied and `b` is never evaluated.
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_probe = calls.clone();
        let functions = FunctionLibrary::new().with_function("probe.count", move |_args| {
            calls_probe.fetch_add(1, Ordering::SeqCst);
            warden_core::Val::of_bool(true)
        });

        let policy = Arc::new(
            Policy::new("conjunction", Entitlement::Permit).with_target(Expression::and(
                Expression::var("a"),
                Expression::function("probe.count", vec![]),
            )),
        );

        let compiled = IndexCompiler::new(MatchingMode::BestEffort)
            .with_strategy(Arc::new(FixedOrder(vec!["Variable(\"a\")", "probe"])))
            .compile(&[policy]);

        let result = compiled
            .container
            .match_request(&ctx_with_vars(&[("a", json!(false))]));
        assert!(result.policies.is_empty());
        assert!(!result.error_occurred);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_index_matches_nothing() {
        let container = CanonicalIndexContainer::empty();
        let result = container.match_request(&ctx_with_vars(&[]));
        assert!(result.policies.is_empty());
        assert!(!result.error_occurred);
    }

    #[test]
    fn test_broken_policy_excluded_others_served() {
        // A pathological target is excluded at compile time; the rest of
        // the set keeps being served.
        let mut pathological = Expression::or(Expression::var("a0"), Expression::var("b0"));
        for i in 1..12 {
            pathological = Expression::and(
                pathological,
                Expression::or(
                    Expression::var(format!("a{}", i)),
                    Expression::var(format!("b{}", i)),
                ),
            );
        }
        let broken =
            Arc::new(Policy::new("broken", Entitlement::Permit).with_target(pathological));
        let healthy = age_policy("healthy");

        let compiled = IndexCompiler::new(MatchingMode::BestEffort).compile(&[broken, healthy]);
        assert_eq!(compiled.errors.len(), 1);
        assert_eq!(compiled.container.policies().len(), 1);

        let result = compiled
            .container
            .match_request(&ctx_with_vars(&[("age", json!(40))]));
        assert_eq!(result.policy_names(), vec!["healthy"]);
    }
}
