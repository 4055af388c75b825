//! Predicate evaluation order.
//!
//! The order predicates are visited in is fixed per snapshot. Strategies
//! rank predicates so that the ones most likely to eliminate clauses early
//! come first.

use std::sync::Arc;

use crate::predicate::{Predicate, PredicateInfo};

/// Produces the fixed evaluation order of a snapshot's predicates.
pub trait PredicateOrderStrategy: Send + Sync {
    /// Rank the interned predicates into evaluation order.
    fn create_order(&self, predicates: Vec<PredicateInfo>) -> Vec<Arc<Predicate>>;
}

/// Orders predicates by descending clause-reference count.
///
/// A predicate shared by many clauses decides more of the index per
/// evaluation, so it is visited first. Interning order breaks ties, which
/// keeps the order deterministic across compilations of the same policy
/// set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPredicateOrderStrategy;

impl PredicateOrderStrategy for DefaultPredicateOrderStrategy {
    fn create_order(&self, mut predicates: Vec<PredicateInfo>) -> Vec<Arc<Predicate>> {
        predicates.sort_by(|a, b| {
            b.clause_count
                .cmp(&a.clause_count)
                .then(a.creation_index.cmp(&b.creation_index))
        });
        predicates.into_iter().map(|info| info.predicate).collect()
    }
}
