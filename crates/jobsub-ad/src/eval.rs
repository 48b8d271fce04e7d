//! Expression evaluation with three-valued logic.

use std::cmp::Ordering;

use crate::ad::AttrLookup;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::value::Value;

/// Maximum attribute indirection depth before evaluation yields `Error`.
const MAX_DEPTH: usize = 64;

impl Expr {
    /// Evaluate against a scope. Unknown attributes are `Undefined`.
    pub fn eval(&self, scope: &dyn AttrLookup) -> Value {
        eval(self, scope, 0)
    }
}

/// True when `constraint` evaluates to a true value in `scope`.
///
/// `Undefined` and `Error` never match.
pub fn matches(constraint: &Expr, scope: &dyn AttrLookup) -> bool {
    constraint.eval(scope).as_bool().unwrap_or(false)
}

fn eval(expr: &Expr, scope: &dyn AttrLookup, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::Error;
    }
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Attr(name) => {
            let (scoped, bare) = split_scope(name);
            if scoped.is_some_and(|s| s.eq_ignore_ascii_case("target")) {
                return Value::Undefined;
            }
            match scope.lookup(bare) {
                Some(inner) => eval(inner, scope, depth + 1),
                None => Value::Undefined,
            }
        }
        Expr::Unary(op, operand) => unary(*op, eval(operand, scope, depth + 1)),
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let left = eval(lhs, scope, depth + 1);
            match left {
                Value::Error => Value::Error,
                _ => match left.as_bool() {
                    Some(false) => Value::Bool(false),
                    Some(true) => logical_operand(eval(rhs, scope, depth + 1)),
                    None if left.is_undefined() => {
                        match eval(rhs, scope, depth + 1).as_bool() {
                            Some(false) => Value::Bool(false),
                            _ => Value::Undefined,
                        }
                    }
                    None => Value::Error,
                },
            }
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let left = eval(lhs, scope, depth + 1);
            match left {
                Value::Error => Value::Error,
                _ => match left.as_bool() {
                    Some(true) => Value::Bool(true),
                    Some(false) => logical_operand(eval(rhs, scope, depth + 1)),
                    None if left.is_undefined() => {
                        match eval(rhs, scope, depth + 1).as_bool() {
                            Some(true) => Value::Bool(true),
                            _ => Value::Undefined,
                        }
                    }
                    None => Value::Error,
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = eval(lhs, scope, depth + 1);
            let right = eval(rhs, scope, depth + 1);
            binary(*op, left, right)
        }
        Expr::Cond(cond, then, otherwise) => {
            let c = eval(cond, scope, depth + 1);
            match c {
                Value::Undefined => Value::Undefined,
                Value::Error => Value::Error,
                _ => match c.as_bool() {
                    Some(true) => eval(then, scope, depth + 1),
                    Some(false) => eval(otherwise, scope, depth + 1),
                    None => Value::Error,
                },
            }
        }
    }
}

fn split_scope(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((scope, bare))
            if scope.eq_ignore_ascii_case("my") || scope.eq_ignore_ascii_case("target") =>
        {
            (Some(scope), bare)
        }
        _ => (None, name),
    }
}

fn logical_operand(v: Value) -> Value {
    match v {
        Value::Undefined => Value::Undefined,
        Value::Error => Value::Error,
        other => other.as_bool().map(Value::Bool).unwrap_or(Value::Error),
    }
}

fn unary(op: UnaryOp, v: Value) -> Value {
    match (op, v) {
        (_, Value::Undefined) => Value::Undefined,
        (_, Value::Error) => Value::Error,
        (UnaryOp::Not, v) => v.as_bool().map(|b| Value::Bool(!b)).unwrap_or(Value::Error),
        (UnaryOp::Neg, Value::Int(i)) => Value::Int(i.wrapping_neg()),
        (UnaryOp::Neg, Value::Real(r)) => Value::Real(-r),
        (UnaryOp::Plus, v @ (Value::Int(_) | Value::Real(_))) => v,
        _ => Value::Error,
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Value {
    match op {
        BinaryOp::MetaEq => Value::Bool(identical(&left, &right)),
        BinaryOp::MetaNe => Value::Bool(!identical(&left, &right)),
        _ if left.is_error() || right.is_error() => Value::Error,
        _ if left.is_undefined() || right.is_undefined() => Value::Undefined,
        BinaryOp::Eq => compare(&left, &right).map(|o| Value::Bool(o == Ordering::Equal)).unwrap_or(Value::Error),
        BinaryOp::Ne => compare(&left, &right).map(|o| Value::Bool(o != Ordering::Equal)).unwrap_or(Value::Error),
        BinaryOp::Lt => compare(&left, &right).map(|o| Value::Bool(o == Ordering::Less)).unwrap_or(Value::Error),
        BinaryOp::Le => compare(&left, &right).map(|o| Value::Bool(o != Ordering::Greater)).unwrap_or(Value::Error),
        BinaryOp::Gt => compare(&left, &right).map(|o| Value::Bool(o == Ordering::Greater)).unwrap_or(Value::Error),
        BinaryOp::Ge => compare(&left, &right).map(|o| Value::Bool(o != Ordering::Less)).unwrap_or(Value::Error),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, &left, &right)
        }
        BinaryOp::And | BinaryOp::Or => Value::Error,
    }
}

/// Exact identity used by `=?=`: same type and same value, strings case-sensitive.
fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Undefined, Value::Undefined) | (Value::Error, Value::Error) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Real(a), Value::Real(b)) => a == b,
        (Value::Int(a), Value::Real(b)) | (Value::Real(b), Value::Int(a)) => (*a as f64) == *b,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => false,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => {
            let (a, b) = (left.as_real()?, right.as_real()?);
            a.partial_cmp(&b)
        }
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Add => Value::Int(a.wrapping_add(b)),
                BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
                BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
                BinaryOp::Div => a.checked_div(b).map(Value::Int).unwrap_or(Value::Error),
                BinaryOp::Mod => a.checked_rem(b).map(Value::Int).unwrap_or(Value::Error),
                _ => Value::Error,
            }
        }
        _ => {
            let (Some(a), Some(b)) = (left.as_real(), right.as_real()) else {
                return Value::Error;
            };
            match op {
                BinaryOp::Add => Value::Real(a + b),
                BinaryOp::Sub => Value::Real(a - b),
                BinaryOp::Mul => Value::Real(a * b),
                BinaryOp::Div if b == 0.0 => Value::Error,
                BinaryOp::Div => Value::Real(a / b),
                BinaryOp::Mod if b == 0.0 => Value::Error,
                BinaryOp::Mod => Value::Real(a % b),
                _ => Value::Error,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ad::Ad;

    fn eval_in(text: &str, ad: &Ad) -> Value {
        Expr::parse(text).unwrap().eval(ad)
    }

    fn sample() -> Ad {
        let mut ad = Ad::new();
        ad.insert_value("Owner", "alice");
        ad.insert_value("JobStatus", 1i64);
        ad.insert_value("RequestCpus", 4i64);
        ad.insert_expr("Doubled", "RequestCpus * 2").unwrap();
        ad.insert_expr("Loop", "Loop + 1").unwrap();
        ad
    }

    #[test]
    fn test_arithmetic_and_references() {
        let ad = sample();
        assert_eq!(eval_in("Doubled + 1", &ad), Value::Int(9));
        assert_eq!(eval_in("RequestCpus / 8.0", &ad), Value::Real(0.5));
        assert_eq!(eval_in("7 % 3", &ad), Value::Int(1));
        assert_eq!(eval_in("1 / 0", &ad), Value::Error);
    }

    #[test]
    fn test_string_equality_is_case_insensitive() {
        let ad = sample();
        assert_eq!(eval_in("Owner == \"ALICE\"", &ad), Value::Bool(true));
        assert_eq!(eval_in("Owner =?= \"ALICE\"", &ad), Value::Bool(false));
        assert_eq!(eval_in("Owner =?= \"alice\"", &ad), Value::Bool(true));
    }

    #[test]
    fn test_undefined_propagation() {
        let ad = sample();
        assert_eq!(eval_in("Missing == 1", &ad), Value::Undefined);
        assert_eq!(eval_in("Missing + 1", &ad), Value::Undefined);
        assert_eq!(eval_in("Missing =?= undefined", &ad), Value::Bool(true));
        assert_eq!(eval_in("Missing =!= undefined", &ad), Value::Bool(false));
    }

    #[test]
    fn test_three_valued_logic() {
        let ad = sample();
        assert_eq!(eval_in("false && Missing", &ad), Value::Bool(false));
        assert_eq!(eval_in("Missing && false", &ad), Value::Bool(false));
        assert_eq!(eval_in("Missing && true", &ad), Value::Undefined);
        assert_eq!(eval_in("true || Missing", &ad), Value::Bool(true));
        assert_eq!(eval_in("Missing || true", &ad), Value::Bool(true));
        assert_eq!(eval_in("Missing || false", &ad), Value::Undefined);
        assert_eq!(eval_in("!Missing", &ad), Value::Undefined);
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let ad = sample();
        assert_eq!(eval_in("Owner < 3", &ad), Value::Error);
        assert_eq!(eval_in("Owner + 1", &ad), Value::Error);
    }

    #[test]
    fn test_conditional() {
        let ad = sample();
        assert_eq!(eval_in("JobStatus == 1 ? \"idle\" : \"other\"", &ad), Value::from("idle"));
        assert_eq!(eval_in("Missing ? 1 : 2", &ad), Value::Undefined);
    }

    #[test]
    fn test_cycle_is_error() {
        let ad = sample();
        assert_eq!(eval_in("Loop", &ad), Value::Error);
    }

    #[test]
    fn test_scoped_references() {
        let ad = sample();
        assert_eq!(eval_in("MY.RequestCpus", &ad), Value::Int(4));
        assert_eq!(eval_in("TARGET.RequestCpus", &ad), Value::Undefined);
    }

    #[test]
    fn test_matches() {
        let ad = sample();
        assert!(matches(&Expr::parse("Owner == \"alice\" && JobStatus == 1").unwrap(), &ad));
        assert!(!matches(&Expr::parse("Missing == 1").unwrap(), &ad));
        assert!(!matches(&Expr::parse("Owner").unwrap(), &ad));
    }
}
