//! Nom parser for the rule language.
//!
//! ```text
//! client IN ("Commune A", "Commune B") AND parameters.FORMAT == "DXF"
//! perimeter intersects POLYGON((6.5 46.5, 6.6 46.5, 6.6 46.6, 6.5 46.5))
//! NOT (surface > 10000 OR tiers != "")
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while1},
    character::complete::{char, multispace0, satisfy},
    combinator::{all_consuming, map, map_opt, not, opt, peek, value},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

/// Request fields a rule may test, normalized (lower case, no underscores).
pub const RULE_FIELDS: &[&str] = &[
    "orderlabel",
    "orderguid",
    "productlabel",
    "productguid",
    "organism",
    "organismguid",
    "client",
    "clientguid",
    "clientdetails",
    "tiers",
    "tiersguid",
    "tiersdetails",
    "perimeter",
    "surface",
    "remark",
];

// =============================================================================
// AST
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Bool(bool),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Condition(Condition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Compare {
        field: String,
        op: CmpOp,
        value: String,
    },
    In {
        field: String,
        negated: bool,
        values: Vec<String>,
    },
    Geo {
        field: String,
        op: GeoOp,
        wkt: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoOp {
    Intersects,
    Contains,
    Disjoint,
    Equals,
    Within,
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Parse a rule expression into its AST.
pub fn parse_rule(text: &str) -> Result<Expr> {
    if text.trim().is_empty() {
        return Err(ExtractError::InvalidRule("the rule is empty".into()));
    }
    match all_consuming(ws(expr))(text) {
        Ok((_, ast)) => Ok(ast),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let near: String = e.input.trim_start().chars().take(30).collect();
            let reason = if near.is_empty() {
                "unexpected end of rule".to_string()
            } else {
                format!("syntax error near '{near}'")
            };
            Err(ExtractError::InvalidRule(reason))
        }
        Err(nom::Err::Incomplete(_)) => {
            Err(ExtractError::InvalidRule("unexpected end of rule".into()))
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// Case-insensitive keyword not followed by an identifier character.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(peek(satisfy(is_ident_char))))
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_until("\""), char('"')),
        delimited(char('\''), take_until("'"), char('\'')),
    ))(input)
}

fn bareword(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || "_.-+:".contains(c))(input)
}

fn literal(input: &str) -> IResult<&str, String> {
    map(alt((quoted, bareword)), str::to_string)(input)
}

/// A field name, resolved to its canonical spelling.
fn field(input: &str) -> IResult<&str, String> {
    map_opt(
        take_while1(|c: char| is_ident_char(c) || c == '.'),
        canonical_field,
    )(input)
}

fn canonical_field(raw: &str) -> Option<String> {
    if let Some((head, key)) = raw.split_once('.') {
        if head.eq_ignore_ascii_case("parameters") && !key.is_empty() {
            return Some(format!("parameters.{key}"));
        }
        return None;
    }
    let normalized: String = raw
        .chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect();
    RULE_FIELDS
        .contains(&normalized.as_str())
        .then_some(normalized)
}

/// A WKT geometry: its type keyword followed by balanced parentheses.
fn wkt_literal(input: &str) -> IResult<&str, &str> {
    let (rest, _) = take_while1(|c: char| c.is_ascii_alphabetic())(input)?;
    let (rest, _) = multispace0(rest)?;
    if rest.get(..5).is_some_and(|s| s.eq_ignore_ascii_case("EMPTY")) {
        let consumed = input.len() - rest.len() + 5;
        return Ok((&input[consumed..], &input[..consumed]));
    }
    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let consumed = input.len() - rest.len() + i + 1;
                    return Ok((&input[consumed..], &input[..consumed]));
                }
            }
            _ if depth == 0 => break,
            _ => {}
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Verify,
    )))
}

// =============================================================================
// GRAMMAR
// =============================================================================

fn expr(input: &str) -> IResult<&str, Expr> {
    or_expr(input)
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    map(
        separated_list1(ws(alt((keyword("OR"), tag("||")))), and_expr),
        |mut terms| {
            if terms.len() == 1 {
                terms.remove(0)
            } else {
                Expr::Or(terms)
            }
        },
    )(input)
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    map(
        separated_list1(ws(alt((keyword("AND"), tag("&&")))), unary),
        |mut terms| {
            if terms.len() == 1 {
                terms.remove(0)
            } else {
                Expr::And(terms)
            }
        },
    )(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(ws(alt((keyword("NOT"), tag("!")))), unary),
            |e| Expr::Not(Box::new(e)),
        ),
        primary,
    ))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        delimited(char('('), ws(expr), char(')')),
        value(Expr::Bool(true), keyword("TRUE")),
        value(Expr::Bool(false), keyword("FALSE")),
        map(condition, Expr::Condition),
    )))(input)
}

fn condition(input: &str) -> IResult<&str, Condition> {
    let (input, field) = field(input)?;
    alt((
        map(pair(ws(geo_op), alt((quoted, wkt_literal))), {
            let field = field.clone();
            move |(op, wkt)| Condition::Geo {
                field: field.clone(),
                op,
                wkt: wkt.to_string(),
            }
        }),
        map(in_list, {
            let field = field.clone();
            move |(negated, values)| Condition::In {
                field: field.clone(),
                negated,
                values,
            }
        }),
        map(pair(ws(cmp_op), literal), move |(op, value)| Condition::Compare {
            field: field.clone(),
            op,
            value,
        }),
    ))(input)
}

fn in_list(input: &str) -> IResult<&str, (bool, Vec<String>)> {
    map(
        tuple((
            ws(opt(keyword("NOT"))),
            keyword("IN"),
            ws(char('(')),
            separated_list1(ws(char(',')), literal),
            ws(char(')')),
        )),
        |(not_kw, _, _, values, _)| (not_kw.is_some(), values),
    )(input)
}

fn cmp_op(input: &str) -> IResult<&str, CmpOp> {
    alt((
        value(CmpOp::Eq, tag("==")),
        value(CmpOp::Ne, tag("!=")),
        value(CmpOp::Ne, tag("<>")),
        value(CmpOp::Ge, tag(">=")),
        value(CmpOp::Le, tag("<=")),
        value(CmpOp::Eq, tag("=")),
        value(CmpOp::Gt, tag(">")),
        value(CmpOp::Lt, tag("<")),
    ))(input)
}

fn geo_op(input: &str) -> IResult<&str, GeoOp> {
    alt((
        value(GeoOp::Intersects, keyword("INTERSECTS")),
        value(GeoOp::Contains, keyword("CONTAINS")),
        value(GeoOp::Disjoint, keyword("DISJOINT")),
        value(GeoOp::Equals, keyword("EQUALS")),
        value(GeoOp::Within, keyword("WITHIN")),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(field: &str, op: CmpOp, value: &str) -> Expr {
        Expr::Condition(Condition::Compare {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    #[test]
    fn comparison_with_field_aliases() {
        assert_eq!(
            parse_rule(r#"Order_Label == "426524""#).unwrap(),
            cmp("orderlabel", CmpOp::Eq, "426524")
        );
        assert_eq!(
            parse_rule("surface>=4800000").unwrap(),
            cmp("surface", CmpOp::Ge, "4800000")
        );
        assert_eq!(
            parse_rule("PARAMETERS.FORMAT <> 'SHP'").unwrap(),
            cmp("parameters.FORMAT", CmpOp::Ne, "SHP")
        );
    }

    #[test]
    fn boolean_precedence() {
        let ast = parse_rule("TRUE or false AND not client = x").unwrap();
        assert_eq!(
            ast,
            Expr::Or(vec![
                Expr::Bool(true),
                Expr::And(vec![
                    Expr::Bool(false),
                    Expr::Not(Box::new(cmp("client", CmpOp::Eq, "x"))),
                ]),
            ])
        );
        let grouped = parse_rule("(TRUE OR FALSE) AND FALSE").unwrap();
        assert!(matches!(grouped, Expr::And(ref t) if t.len() == 2));
    }

    #[test]
    fn in_lists_across_line_breaks() {
        let ast = parse_rule("productguid NOT IN (\r\n  \"a\",\r\n  'b'\r\n)").unwrap();
        assert_eq!(
            ast,
            Expr::Condition(Condition::In {
                field: "productguid".into(),
                negated: true,
                values: vec!["a".into(), "b".into()],
            })
        );
    }

    #[test]
    fn geometric_condition_keeps_wkt() {
        let ast = parse_rule("perimeter intersects POLYGON((0 0, 1 0, 1 1, 0 0)) AND TRUE").unwrap();
        let Expr::And(terms) = ast else {
            panic!("expected AND");
        };
        assert_eq!(
            terms[0],
            Expr::Condition(Condition::Geo {
                field: "perimeter".into(),
                op: GeoOp::Intersects,
                wkt: "POLYGON((0 0, 1 0, 1 1, 0 0))".into(),
            })
        );
    }

    #[test]
    fn rejects_unknown_fields_and_bad_syntax() {
        for bad in [
            "",
            "   ",
            "password == 'x'",
            "client ==",
            "client == 'x' AND",
            "(TRUE",
            "perimeter within POLYGON((0 0, 1 1)",
            "other.FORMAT == 'x'",
        ] {
            assert!(
                matches!(parse_rule(bad), Err(ExtractError::InvalidRule(_))),
                "{bad:?} should not parse"
            );
        }
    }
}
