//! Disjunctive normal form of target expressions.
//!
//! A target formula is normalized into a disjunction of conjunctive
//! clauses over possibly negated atomic predicates. Identity of every
//! structure is semantic: import aliases are resolved, so textually
//! different but equivalent targets collapse during interning.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use warden_core::EngineError;
use warden_lang::Expression;

/// Clause-count guard for the cross-product step. Pathological targets
/// whose normal form grows past this limit are rejected at compile time.
pub const MAX_CLAUSES: usize = 512;

/// A possibly negated atomic boolean sub-expression.
#[derive(Debug, Clone)]
pub struct Literal {
    negated: bool,
    expression: Arc<Expression>,
    imports: Arc<HashMap<String, String>>,
    semantic_hash: u64,
}

impl Literal {
    /// Literal over an atomic expression
    #[must_use]
    pub fn new(
        negated: bool,
        expression: Arc<Expression>,
        imports: Arc<HashMap<String, String>>,
    ) -> Self {
        let semantic_hash = expression.semantic_hash(&imports);
        Self {
            negated,
            expression,
            imports,
            semantic_hash,
        }
    }

    /// True if the literal is negated
    #[must_use]
    pub fn negated(&self) -> bool {
        self.negated
    }

    /// The atomic expression
    #[must_use]
    pub fn expression(&self) -> &Arc<Expression> {
        &self.expression
    }

    /// Import map of the policy the expression came from
    #[must_use]
    pub fn imports(&self) -> &Arc<HashMap<String, String>> {
        &self.imports
    }

    /// Import-aware hash of the underlying expression, ignoring negation
    #[must_use]
    pub fn semantic_hash(&self) -> u64 {
        self.semantic_hash
    }

    fn same_atom(&self, other: &Literal) -> bool {
        self.semantic_hash == other.semantic_hash
            && self
                .expression
                .semantic_eq(&other.expression, &self.imports, &other.imports)
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.negated == other.negated && self.same_atom(other)
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.negated.hash(state);
        state.write_u64(self.semantic_hash);
    }
}

/// An AND-combination of literals.
///
/// Construction normalizes: literals are ordered by hash, duplicates are
/// removed. A clause containing a literal and its negation is contradictory
/// and is dropped by [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConjunctiveClause {
    literals: Vec<Literal>,
}

impl ConjunctiveClause {
    fn new(mut literals: Vec<Literal>) -> Self {
        literals.sort_by_key(|l| (l.semantic_hash(), l.negated()));
        literals.dedup();
        Self { literals }
    }

    /// The literals of this clause
    #[must_use]
    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    /// Number of literals
    #[must_use]
    pub fn len(&self) -> usize {
        self.literals.len()
    }

    /// True if the clause has no literals
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    fn is_contradictory(&self) -> bool {
        self.literals
            .windows(2)
            .any(|pair| pair[0].same_atom(&pair[1]) && pair[0].negated() != pair[1].negated())
    }
}

impl Hash for ConjunctiveClause {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.literals.len());
        for literal in &self.literals {
            literal.hash(state);
        }
    }
}

/// A target formula in disjunctive normal form: an OR of clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisjunctiveFormula {
    clauses: Vec<ConjunctiveClause>,
}

impl DisjunctiveFormula {
    fn new(mut clauses: Vec<ConjunctiveClause>) -> Self {
        clauses.sort_by(|a, b| clause_sort_key(a).cmp(&clause_sort_key(b)));
        clauses.dedup();
        Self { clauses }
    }

    /// The clauses of this formula
    #[must_use]
    pub fn clauses(&self) -> &[ConjunctiveClause] {
        &self.clauses
    }

    /// True if no clause survived normalization; such a formula can never
    /// be satisfied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl Hash for DisjunctiveFormula {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.clauses.len());
        for clause in &self.clauses {
            clause.hash(state);
        }
    }
}

fn clause_sort_key(clause: &ConjunctiveClause) -> Vec<(u64, bool)> {
    clause
        .literals()
        .iter()
        .map(|l| (l.semantic_hash(), l.negated()))
        .collect()
}

/// Normalize a target expression into disjunctive normal form.
///
/// Negation is pushed down by De Morgan's laws and double negations are
/// eliminated. Everything that is not an AND, OR, or NOT is an atomic
/// literal, including eager XOR.
///
/// # Errors
///
/// Returns [`EngineError::IndexCompilation`] when the cross-product step
/// exceeds [`MAX_CLAUSES`] clauses.
pub fn normalize(
    policy: &str,
    target: &Expression,
    imports: &Arc<HashMap<String, String>>,
) -> Result<DisjunctiveFormula, EngineError> {
    let clauses = to_clauses(policy, target, false, imports)?;
    let kept = clauses
        .into_iter()
        .map(ConjunctiveClause::new)
        .filter(|clause| !clause.is_contradictory())
        .collect();
    Ok(DisjunctiveFormula::new(kept))
}

fn to_clauses(
    policy: &str,
    expr: &Expression,
    negated: bool,
    imports: &Arc<HashMap<String, String>>,
) -> Result<Vec<Vec<Literal>>, EngineError> {
    match (expr, negated) {
        (Expression::Not(inner), _) => to_clauses(policy, inner, !negated, imports),
        // OR distributes into a clause union; under negation AND does.
        (Expression::Or(left, right), false) | (Expression::And(left, right), true) => {
            let mut clauses = to_clauses(policy, left, negated, imports)?;
            clauses.extend(to_clauses(policy, right, negated, imports)?);
            Ok(clauses)
        }
        // AND distributes into the clause cross-product; under negation OR does.
        (Expression::And(left, right), false) | (Expression::Or(left, right), true) => {
            let left_clauses = to_clauses(policy, left, negated, imports)?;
            let right_clauses = to_clauses(policy, right, negated, imports)?;
            if left_clauses.len().saturating_mul(right_clauses.len()) > MAX_CLAUSES {
                return Err(EngineError::IndexCompilation {
                    policy: policy.to_string(),
                    reason: format!(
                        "target normal form exceeds {} clauses",
                        MAX_CLAUSES
                    ),
                });
            }
            let mut clauses = Vec::with_capacity(left_clauses.len() * right_clauses.len());
            for l in &left_clauses {
                for r in &right_clauses {
                    let mut merged = l.clone();
                    merged.extend(r.iter().cloned());
                    clauses.push(merged);
                }
            }
            Ok(clauses)
        }
        (atomic, _) => Ok(vec![vec![Literal::new(
            negated,
            Arc::new(atomic.clone()),
            imports.clone(),
        )]]),
    }
}
