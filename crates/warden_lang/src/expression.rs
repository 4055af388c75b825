//! The policy expression tree.
//!
//! A closed tagged-variant AST. Policy source collaborators ship parsed
//! trees across the boundary, so every node is serializable. Structural
//! equality and hashing are import-aware: two references to the same
//! function or attribute under different import aliases compare and hash
//! equal, which is what makes target-predicate deduplication across
//! policies work.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use warden_core::hash_json;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// Structural equality
    Eq,
    /// Structural inequality
    Ne,
    /// Numeric less-than
    Lt,
    /// Numeric less-or-equal
    Le,
    /// Numeric greater-than
    Gt,
    /// Numeric greater-or-equal
    Ge,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

/// A node of the policy expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    /// Immediate JSON value
    Literal(Json),
    /// Variable lookup in the evaluation context
    Variable(String),
    /// Eager logical AND, both operands always evaluated
    And(Box<Expression>, Box<Expression>),
    /// Eager logical OR, both operands always evaluated
    Or(Box<Expression>, Box<Expression>),
    /// Eager logical XOR
    Xor(Box<Expression>, Box<Expression>),
    /// Boolean negation
    Not(Box<Expression>),
    /// Comparison of two operands
    Comparison {
        /// The operator
        op: Comparator,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// Numeric arithmetic on two operands
    Arithmetic {
        /// The operator
        op: ArithmeticOp,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// Pure synchronous function-library call
    Function {
        /// Function name, possibly an import alias
        name: String,
        /// Argument expressions
        args: Vec<Expression>,
    },
    /// Live external attribute stream
    Attribute {
        /// Attribute name, possibly an import alias
        name: String,
        /// Argument expressions, evaluated once per subscription
        args: Vec<Expression>,
    },
}

// Per-variant hash salts, mixed with a shared prime.
const HASH_PRIME: u64 = 31;
const SALT_LITERAL: u64 = 3;
const SALT_VARIABLE: u64 = 5;
const SALT_AND: u64 = 7;
const SALT_OR: u64 = 11;
const SALT_XOR: u64 = 13;
const SALT_NOT: u64 = 17;
const SALT_COMPARISON: u64 = 19;
const SALT_ARITHMETIC: u64 = 23;
const SALT_FUNCTION: u64 = 29;
const SALT_ATTRIBUTE: u64 = 37;

fn combine(hash: u64, value: u64) -> u64 {
    hash.wrapping_mul(HASH_PRIME).wrapping_add(value)
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Resolve a name through the import map; unknown names resolve to
/// themselves.
#[must_use]
pub fn resolve_name<'a>(name: &'a str, imports: &'a HashMap<String, String>) -> &'a str {
    imports.get(name).map(String::as_str).unwrap_or(name)
}

impl Expression {
    /// Literal node
    #[must_use]
    pub fn literal(value: impl Into<Json>) -> Self {
        Self::Literal(value.into())
    }

    /// Variable reference
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Eager AND of two expressions
    #[must_use]
    pub fn and(left: Expression, right: Expression) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    /// Eager OR of two expressions
    #[must_use]
    pub fn or(left: Expression, right: Expression) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    /// Eager XOR of two expressions
    #[must_use]
    pub fn xor(left: Expression, right: Expression) -> Self {
        Self::Xor(Box::new(left), Box::new(right))
    }

    /// Negation of an expression
    #[must_use]
    pub fn not(inner: Expression) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Comparison node
    #[must_use]
    pub fn compare(op: Comparator, left: Expression, right: Expression) -> Self {
        Self::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Arithmetic node
    #[must_use]
    pub fn arithmetic(op: ArithmeticOp, left: Expression, right: Expression) -> Self {
        Self::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Function call node
    #[must_use]
    pub fn function(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::Function {
            name: name.into(),
            args,
        }
    }

    /// Attribute lookup node
    #[must_use]
    pub fn attribute(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::Attribute {
            name: name.into(),
            args,
        }
    }

    /// True if the tree contains an attribute lookup anywhere.
    #[must_use]
    pub fn has_attribute(&self) -> bool {
        match self {
            Self::Literal(_) | Self::Variable(_) => false,
            Self::Not(inner) => inner.has_attribute(),
            Self::And(l, r) | Self::Or(l, r) | Self::Xor(l, r) => {
                l.has_attribute() || r.has_attribute()
            }
            Self::Comparison { left, right, .. } | Self::Arithmetic { left, right, .. } => {
                left.has_attribute() || right.has_attribute()
            }
            Self::Function { args, .. } => args.iter().any(Expression::has_attribute),
            Self::Attribute { .. } => true,
        }
    }

    /// Import-aware structural hash.
    ///
    /// Function and attribute names are resolved through the import map
    /// before hashing, so semantically identical references under
    /// different aliases hash equal.
    #[must_use]
    pub fn semantic_hash(&self, imports: &HashMap<String, String>) -> u64 {
        match self {
            Self::Literal(value) => {
                let mut hasher = DefaultHasher::new();
                hash_json(value, &mut hasher);
                combine(SALT_LITERAL, hasher.finish())
            }
            Self::Variable(name) => combine(SALT_VARIABLE, hash_str(name)),
            Self::And(l, r) => combine(
                combine(SALT_AND, l.semantic_hash(imports)),
                r.semantic_hash(imports),
            ),
            Self::Or(l, r) => combine(
                combine(SALT_OR, l.semantic_hash(imports)),
                r.semantic_hash(imports),
            ),
            Self::Xor(l, r) => combine(
                combine(SALT_XOR, l.semantic_hash(imports)),
                r.semantic_hash(imports),
            ),
            Self::Not(inner) => combine(SALT_NOT, inner.semantic_hash(imports)),
            Self::Comparison { op, left, right } => {
                let mut hash = combine(SALT_COMPARISON, *op as u64);
                hash = combine(hash, left.semantic_hash(imports));
                combine(hash, right.semantic_hash(imports))
            }
            Self::Arithmetic { op, left, right } => {
                let mut hash = combine(SALT_ARITHMETIC, *op as u64);
                hash = combine(hash, left.semantic_hash(imports));
                combine(hash, right.semantic_hash(imports))
            }
            Self::Function { name, args } => {
                let mut hash = combine(SALT_FUNCTION, hash_str(resolve_name(name, imports)));
                for arg in args {
                    hash = combine(hash, arg.semantic_hash(imports));
                }
                hash
            }
            Self::Attribute { name, args } => {
                let mut hash = combine(SALT_ATTRIBUTE, hash_str(resolve_name(name, imports)));
                for arg in args {
                    hash = combine(hash, arg.semantic_hash(imports));
                }
                hash
            }
        }
    }

    /// Import-aware structural equality, the counterpart of
    /// [`Expression::semantic_hash`].
    #[must_use]
    pub fn semantic_eq(
        &self,
        other: &Expression,
        imports: &HashMap<String, String>,
        other_imports: &HashMap<String, String>,
    ) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Variable(a), Self::Variable(b)) => a == b,
            (Self::And(al, ar), Self::And(bl, br))
            | (Self::Or(al, ar), Self::Or(bl, br))
            | (Self::Xor(al, ar), Self::Xor(bl, br)) => {
                al.semantic_eq(bl, imports, other_imports)
                    && ar.semantic_eq(br, imports, other_imports)
            }
            (Self::Not(a), Self::Not(b)) => a.semantic_eq(b, imports, other_imports),
            (
                Self::Comparison {
                    op: aop,
                    left: al,
                    right: ar,
                },
                Self::Comparison {
                    op: bop,
                    left: bl,
                    right: br,
                },
            ) => {
                aop == bop
                    && al.semantic_eq(bl, imports, other_imports)
                    && ar.semantic_eq(br, imports, other_imports)
            }
            (
                Self::Arithmetic {
                    op: aop,
                    left: al,
                    right: ar,
                },
                Self::Arithmetic {
                    op: bop,
                    left: bl,
                    right: br,
                },
            ) => {
                aop == bop
                    && al.semantic_eq(bl, imports, other_imports)
                    && ar.semantic_eq(br, imports, other_imports)
            }
            (
                Self::Function {
                    name: aname,
                    args: aargs,
                },
                Self::Function {
                    name: bname,
                    args: bargs,
                },
            )
            | (
                Self::Attribute {
                    name: aname,
                    args: aargs,
                },
                Self::Attribute {
                    name: bname,
                    args: bargs,
                },
            ) => {
                resolve_name(aname, imports) == resolve_name(bname, other_imports)
                    && aargs.len() == bargs.len()
                    && aargs
                        .iter()
                        .zip(bargs)
                        .all(|(a, b)| a.semantic_eq(b, imports, other_imports))
            }
            _ => false,
        }
    }
}
