//! Rule language: routes imported requests to processes.

pub mod eval;
pub mod geometry;
pub mod parser;

pub use parser::{parse_rule, CmpOp, Condition, Expr, GeoOp};

use crate::connector::Rule;
use crate::error::Result;
use crate::request::Request;

/// Check that a rule parses. Used when rules are edited.
pub fn validate_rule(text: &str) -> Result<()> {
    parse_rule(text).map(|_| ())
}

/// Evaluate one expression against a request.
pub fn evaluate_rule(text: &str, request: &Request) -> Result<bool> {
    let ast = parse_rule(text)?;
    Ok(eval::evaluate(&ast, request))
}

/// First usable rule, in position order, whose expression holds for `request`.
/// Rules that fail to parse never match.
pub fn match_rules<'a>(request: &Request, rules: &'a [Rule]) -> Option<&'a Rule> {
    let mut candidates: Vec<&Rule> = rules.iter().filter(|r| r.is_usable()).collect();
    candidates.sort_by_key(|r| r.position);
    candidates.into_iter().find(|rule| match evaluate_rule(&rule.expression, request) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::warn!(rule = rule.id, request = request.id, error = %e, "rule skipped");
            false
        }
    })
}
