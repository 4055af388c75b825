//! Expression evaluation.
//!
//! Evaluation produces a live sequence of values, not a single value:
//! attribute lookups are continuously updating external sources, and every
//! operator above them recombines on each upstream emission with
//! latest-value semantics. Only attribute lookups suspend; everything else
//! is synchronous given current inputs.
//!
//! Target expressions are evaluated with [`Expression::evaluate_once`],
//! which has no suspension points and rejects attribute lookups.

use futures::stream::StreamExt;
use serde_json::Value as Json;

use warden_core::{Val, json_type_name};

use crate::context::EvaluationContext;
use crate::expression::{ArithmeticOp, Comparator, Expression};
use crate::streams::{ValStream, combine_latest, combine_latest_all, once_val};

const ATTRIBUTE_IN_TARGET: &str =
    "Attribute resolution error. Attributes not allowed in target.";

impl Expression {
    /// Open a live evaluation of this expression.
    ///
    /// The returned stream emits a new value whenever any attribute source
    /// underneath this expression emits. Expressions without attribute
    /// lookups emit exactly once and complete.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> ValStream {
        match self {
            Self::Literal(value) => once_val(Val::of(value.clone())),
            Self::Variable(name) => once_val(ctx.variables().get(name)),
            Self::And(left, right) => boolean_operator(left, right, ctx, |a, b| a && b),
            Self::Or(left, right) => boolean_operator(left, right, ctx, |a, b| a || b),
            Self::Xor(left, right) => boolean_operator(left, right, ctx, |a, b| a ^ b),
            Self::Not(inner) => inner.evaluate(ctx).map(negate).boxed(),
            Self::Comparison { op, left, right } => {
                let op = *op;
                combine_latest(left.evaluate(ctx), right.evaluate(ctx), move |l, r| {
                    compare(op, l, r)
                })
            }
            Self::Arithmetic { op, left, right } => {
                let op = *op;
                combine_latest(left.evaluate(ctx), right.evaluate(ctx), move |l, r| {
                    arithmetic(op, l, r)
                })
            }
            Self::Function { name, args } => {
                let resolved = ctx.resolve(name);
                let call_ctx = ctx.clone();
                let arg_streams: Vec<ValStream> =
                    args.iter().map(|arg| arg.evaluate(ctx)).collect();
                combine_latest_all(arg_streams)
                    .map(move |vals| {
                        if let Some(err) = vals.iter().find(|v| v.is_error()) {
                            return err.clone();
                        }
                        call_ctx.functions().evaluate(&resolved, &vals)
                    })
                    .boxed()
            }
            Self::Attribute { name, args } => {
                let resolved = ctx.resolve(name);
                let arg_vals: Vec<Val> =
                    args.iter().map(|arg| arg.evaluate_once(ctx)).collect();
                if let Some(err) = arg_vals.iter().find(|v| v.is_error()) {
                    return once_val(err.clone());
                }
                ctx.attributes()
                    .evaluate_attribute(&resolved, &arg_vals, ctx.variables())
            }
        }
    }

    /// Evaluate synchronously against current inputs.
    ///
    /// Used for target expressions, which must not suspend: attribute
    /// lookups produce a resolution error value.
    #[must_use]
    pub fn evaluate_once(&self, ctx: &EvaluationContext) -> Val {
        match self {
            Self::Literal(value) => Val::of(value.clone()),
            Self::Variable(name) => ctx.variables().get(name),
            Self::And(left, right) => {
                boolean_once(left.evaluate_once(ctx), right.evaluate_once(ctx), |a, b| a && b)
            }
            Self::Or(left, right) => {
                boolean_once(left.evaluate_once(ctx), right.evaluate_once(ctx), |a, b| a || b)
            }
            Self::Xor(left, right) => {
                boolean_once(left.evaluate_once(ctx), right.evaluate_once(ctx), |a, b| a ^ b)
            }
            Self::Not(inner) => negate(inner.evaluate_once(ctx)),
            Self::Comparison { op, left, right } => {
                compare(*op, &left.evaluate_once(ctx), &right.evaluate_once(ctx))
            }
            Self::Arithmetic { op, left, right } => {
                arithmetic(*op, &left.evaluate_once(ctx), &right.evaluate_once(ctx))
            }
            Self::Function { name, args } => {
                let vals: Vec<Val> = args.iter().map(|arg| arg.evaluate_once(ctx)).collect();
                if let Some(err) = vals.iter().find(|v| v.is_error()) {
                    return err.clone();
                }
                ctx.functions().evaluate(&ctx.resolve(name), &vals)
            }
            Self::Attribute { name, .. } => Val::error(ATTRIBUTE_IN_TARGET).with_trace(
                "attribute",
                vec![("attribute".to_string(), Val::of(ctx.resolve(name)))],
            ),
        }
    }
}

/// Eager boolean operator: evaluate both operand streams, recombine on
/// every update from either side, propagate the current error if any.
fn boolean_operator(
    left: &Expression,
    right: &Expression,
    ctx: &EvaluationContext,
    op: fn(bool, bool) -> bool,
) -> ValStream {
    let left = left.evaluate(ctx).map(Val::require_boolean).boxed();
    let right = right.evaluate(ctx).map(Val::require_boolean).boxed();
    combine_latest(left, right, move |l, r| apply_boolean(l, r, op))
}

fn boolean_once(left: Val, right: Val, op: fn(bool, bool) -> bool) -> Val {
    apply_boolean(&left.require_boolean(), &right.require_boolean(), op)
}

fn apply_boolean(left: &Val, right: &Val, op: fn(bool, bool) -> bool) -> Val {
    if left.is_error() {
        return left.clone();
    }
    if right.is_error() {
        return right.clone();
    }
    match (left.get(), right.get()) {
        (Some(Json::Bool(a)), Some(Json::Bool(b))) => Val::of_bool(op(*a, *b)),
        // Unreachable after require_boolean, kept as a diagnostic.
        _ => Val::error("Type mismatch. Boolean operation expects boolean values."),
    }
}

fn negate(val: Val) -> Val {
    match val {
        Val::Value(Json::Bool(b)) => Val::of_bool(!b),
        Val::Error { .. } => val,
        Val::Value(other) => Val::error(format!(
            "Type mismatch. Boolean negation expects boolean value, but got: '{}'.",
            json_type_name(&other)
        )),
        Val::Undefined => Val::error(
            "Type mismatch. Boolean negation expects boolean value, but got: 'undefined'.",
        ),
    }
}

fn compare(op: Comparator, left: &Val, right: &Val) -> Val {
    if left.is_error() {
        return left.clone();
    }
    if right.is_error() {
        return right.clone();
    }
    let (Some(l), Some(r)) = (left.get(), right.get()) else {
        return Val::error("Type mismatch. Comparison expects defined values, but got: 'undefined'.");
    };
    match op {
        Comparator::Eq => Val::of_bool(l == r),
        Comparator::Ne => Val::of_bool(l != r),
        Comparator::Lt | Comparator::Le | Comparator::Gt | Comparator::Ge => {
            let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                let offending = if l.as_f64().is_none() { l } else { r };
                return Val::error(format!(
                    "Type mismatch. Comparison expects number values, but got: '{}'.",
                    json_type_name(offending)
                ));
            };
            Val::of_bool(match op {
                Comparator::Lt => a < b,
                Comparator::Le => a <= b,
                Comparator::Gt => a > b,
                Comparator::Ge => a >= b,
                Comparator::Eq | Comparator::Ne => unreachable!(),
            })
        }
    }
}

fn arithmetic(op: ArithmeticOp, left: &Val, right: &Val) -> Val {
    if left.is_error() {
        return left.clone();
    }
    if right.is_error() {
        return right.clone();
    }
    let numbers = left
        .get()
        .and_then(Json::as_f64)
        .zip(right.get().and_then(Json::as_f64));
    let Some((a, b)) = numbers else {
        let offending = match left.get() {
            Some(l) if l.as_f64().is_none() => json_type_name(l),
            Some(_) => match right.get() {
                Some(r) => json_type_name(r),
                None => "undefined",
            },
            None => "undefined",
        };
        return Val::error(format!(
            "Type mismatch. Arithmetic operation expects number values, but got: '{}'.",
            offending
        ));
    };
    let result = match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Sub => a - b,
        ArithmeticOp::Mul => a * b,
        ArithmeticOp::Div => {
            if b == 0.0 {
                return Val::error("Division by zero.");
            }
            a / b
        }
    };
    match serde_json::Number::from_f64(result) {
        Some(n) => Val::of(Json::Number(n)),
        None => Val::error("Arithmetic result is not a finite number."),
    }
}
