//! Compilation of a policy set into a canonical index snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use warden_core::EngineError;
use warden_lang::Policy;

use crate::bitmask::Bitmask;
use crate::container::{CTuple, CanonicalIndexContainer};
use crate::formula::{ConjunctiveClause, DisjunctiveFormula, normalize};
use crate::ordering::{DefaultPredicateOrderStrategy, PredicateOrderStrategy};
use crate::predicate::{Predicate, PredicateInfo};

/// How predicate evaluation failures are treated during a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchingMode {
    /// The first failure aborts the match; only formulas fully satisfied
    /// before it are reported.
    AbortOnError,
    /// Failures eliminate the affected clauses; all other formulas are
    /// matched as in an error-free run.
    #[default]
    BestEffort,
}

/// A freshly compiled index plus the policies that had to be excluded.
#[derive(Debug)]
pub struct CompiledIndex {
    /// The immutable snapshot
    pub container: Arc<CanonicalIndexContainer>,
    /// One entry per policy whose target could not be compiled
    pub errors: Vec<EngineError>,
}

/// Compiles policy sets into [`CanonicalIndexContainer`] snapshots.
pub struct IndexCompiler {
    mode: MatchingMode,
    strategy: Arc<dyn PredicateOrderStrategy>,
}

impl IndexCompiler {
    /// Compiler with the default predicate order strategy
    #[must_use]
    pub fn new(mode: MatchingMode) -> Self {
        Self {
            mode,
            strategy: Arc::new(DefaultPredicateOrderStrategy),
        }
    }

    /// Override the predicate order strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn PredicateOrderStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Compile the full policy set into a new immutable snapshot.
    ///
    /// Compilation failures are fatal to the offending policy only: it is
    /// excluded from matching and reported, the remaining policies are
    /// served.
    #[must_use]
    pub fn compile(&self, policies: &[Arc<Policy>]) -> CompiledIndex {
        let mut errors = Vec::new();

        // Normalize targets; dedup structurally identical formulas so
        // policies sharing a target share its clauses.
        let mut kept: Vec<Arc<Policy>> = Vec::new();
        let mut formula_ids: IndexMap<DisjunctiveFormula, usize> = IndexMap::new();
        let mut formula_policies: Vec<Vec<usize>> = Vec::new();

        for policy in policies {
            let imports = Arc::new(policy.imports.clone());
            match normalize(&policy.name, &policy.target, &imports) {
                Ok(formula) => {
                    let policy_index = kept.len();
                    kept.push(policy.clone());
                    let next_id = formula_ids.len();
                    let formula_id = *formula_ids.entry(formula).or_insert(next_id);
                    if formula_id == formula_policies.len() {
                        formula_policies.push(Vec::new());
                    }
                    formula_policies[formula_id].push(policy_index);
                }
                Err(err) => {
                    warn!(policy = %policy.name, error = %err, "excluding policy from index");
                    errors.push(err);
                }
            }
        }

        // Intern clauses globally and record per-formula clause sets.
        let mut clause_ids: IndexMap<ConjunctiveClause, usize> = IndexMap::new();
        let mut formula_clauses: Vec<Vec<usize>> = vec![Vec::new(); formula_ids.len()];
        for (formula, &formula_id) in &formula_ids {
            for clause in formula.clauses() {
                let next_id = clause_ids.len();
                let clause_id = *clause_ids.entry(clause.clone()).or_insert(next_id);
                formula_clauses[formula_id].push(clause_id);
            }
        }
        let clause_count = clause_ids.len();

        // Relationship tables.
        let mut literals_in_clause = vec![0u32; clause_count];
        for (clause, &clause_id) in &clause_ids {
            literals_in_clause[clause_id] = clause.len() as u32;
        }

        let mut formulas_with_clause = vec![0u32; clause_count];
        let mut related_formulas: Vec<Vec<usize>> = vec![Vec::new(); clause_count];
        for (formula_id, clauses) in formula_clauses.iter().enumerate() {
            for &clause_id in clauses {
                formulas_with_clause[clause_id] += 1;
                related_formulas[clause_id].push(formula_id);
            }
        }

        // Reverse map: satisfying one clause decides every formula holding
        // it, which removes those formulas from the count backing each
        // sibling clause.
        let mut referencing_counts: Vec<BTreeMap<usize, u32>> =
            vec![BTreeMap::new(); clause_count];
        for clauses in &formula_clauses {
            for &clause_id in clauses {
                for &sibling in clauses {
                    if sibling != clause_id {
                        *referencing_counts[clause_id].entry(sibling).or_insert(0) += 1;
                    }
                }
            }
        }
        let referencing: Vec<Vec<CTuple>> = referencing_counts
            .into_iter()
            .map(|counts| {
                counts
                    .into_iter()
                    .map(|(clause_index, count)| CTuple {
                        clause_index,
                        count,
                    })
                    .collect()
            })
            .collect();

        // Intern predicates across clauses and accumulate their masks.
        struct PredicateBuilder {
            expression: Arc<warden_lang::Expression>,
            imports: Arc<HashMap<String, String>>,
            conjunctions: Bitmask,
            false_for_true: Bitmask,
            false_for_false: Bitmask,
        }
        let mut predicate_ids: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut builders: Vec<PredicateBuilder> = Vec::new();

        for (clause, &clause_id) in &clause_ids {
            for literal in clause.literals() {
                let hash = literal.semantic_hash();
                let candidates = predicate_ids.entry(hash).or_default();
                let existing = candidates.iter().copied().find(|&id| {
                    builders[id].expression.semantic_eq(
                        literal.expression(),
                        &builders[id].imports,
                        literal.imports(),
                    )
                });
                let id = match existing {
                    Some(id) => id,
                    None => {
                        let id = builders.len();
                        builders.push(PredicateBuilder {
                            expression: literal.expression().clone(),
                            imports: literal.imports().clone(),
                            conjunctions: Bitmask::with_len(clause_count),
                            false_for_true: Bitmask::with_len(clause_count),
                            false_for_false: Bitmask::with_len(clause_count),
                        });
                        candidates.push(id);
                        id
                    }
                };
                let builder = &mut builders[id];
                builder.conjunctions.set(clause_id);
                if literal.negated() {
                    // A true outcome falsifies the negated occurrence.
                    builder.false_for_true.set(clause_id);
                } else {
                    builder.false_for_false.set(clause_id);
                }
            }
        }

        let infos: Vec<PredicateInfo> = builders
            .into_iter()
            .enumerate()
            .map(|(creation_index, b)| {
                let clause_refs = b.conjunctions.count_ones();
                PredicateInfo {
                    predicate: Arc::new(Predicate::new(
                        b.expression,
                        b.imports,
                        b.conjunctions,
                        b.false_for_true,
                        b.false_for_false,
                    )),
                    clause_count: clause_refs,
                    creation_index,
                }
            })
            .collect();
        let predicate_order = self.strategy.create_order(infos);

        debug!(
            policies = kept.len(),
            formulas = formula_ids.len(),
            clauses = clause_count,
            predicates = predicate_order.len(),
            excluded = errors.len(),
            "compiled canonical index"
        );

        CompiledIndex {
            container: Arc::new(CanonicalIndexContainer::new(
                self.mode,
                predicate_order,
                related_formulas,
                formula_policies,
                kept,
                referencing,
                literals_in_clause,
                formulas_with_clause,
            )),
            errors,
        }
    }
}

impl Default for IndexCompiler {
    fn default() -> Self {
        Self::new(MatchingMode::default())
    }
}
