//! Evaluation of a parsed rule against a request.

use std::cmp::Ordering;

use super::geometry;
use super::parser::{CmpOp, Condition, Expr};
use crate::request::Request;

pub fn evaluate(expr: &Expr, request: &Request) -> bool {
    match expr {
        Expr::Bool(b) => *b,
        Expr::Not(inner) => !evaluate(inner, request),
        Expr::And(terms) => terms.iter().all(|t| evaluate(t, request)),
        Expr::Or(terms) => terms.iter().any(|t| evaluate(t, request)),
        Expr::Condition(c) => evaluate_condition(c, request),
    }
}

fn evaluate_condition(condition: &Condition, request: &Request) -> bool {
    match condition {
        Condition::Compare { field, op, value } => match request.field_value(field) {
            Some(actual) => compare(&actual, *op, value),
            None => *op == CmpOp::Ne,
        },
        Condition::In {
            field,
            negated,
            values,
        } => match request.field_value(field) {
            Some(actual) => {
                let found = values.iter().any(|v| compare(&actual, CmpOp::Eq, v));
                found != *negated
            }
            None => *negated,
        },
        Condition::Geo { field, op, wkt } => {
            let Some(subject) = request.field_value(field) else {
                return false;
            };
            match (geometry::parse_wkt(&subject), geometry::parse_wkt(wkt)) {
                (Ok(a), Ok(b)) => geometry::relate(*op, &a, &b),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::debug!(request = request.id, error = %e, "geometry not comparable");
                    false
                }
            }
        }
    }
}

fn clean(value: &str) -> String {
    value
        .replace("\r\n", " ")
        .replace(['\r', '\n'], " ")
        .trim()
        .to_string()
}

fn finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Numeric when both sides are finite numbers, case-insensitive text otherwise.
fn compare(actual: &str, op: CmpOp, expected: &str) -> bool {
    let (a, b) = (clean(actual), clean(expected));
    let ordering = match (finite(&a), finite(&b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => a.to_lowercase().cmp(&b.to_lowercase()),
    };
    match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_text_comparison() {
        assert!(compare("4817500", CmpOp::Gt, "4800000"));
        assert!(compare("4817500.0", CmpOp::Eq, "4817500"));
        assert!(!compare("9", CmpOp::Gt, "10"));
        // Text ordering when one side is not a number.
        assert!(compare("9a", CmpOp::Gt, "10"));
        assert!(compare("Yves  Grasset\r\n", CmpOp::Eq, "yves  grasset"));
        assert!(compare("a", CmpOp::Le, "A"));
    }

    #[test]
    fn non_finite_values_compare_as_text() {
        assert!(compare("NaN", CmpOp::Ne, "5"));
        assert!(!compare("NaN", CmpOp::Eq, "5"));
        assert!(compare("inf", CmpOp::Ne, "infinity"));
        assert!(compare("Infinity", CmpOp::Eq, "infinity"));
    }
}
