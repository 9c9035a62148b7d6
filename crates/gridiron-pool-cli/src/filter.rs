//! Parser for `--filter` expressions.
//!
//! Grammar, one condition per flag (conditions are ANDed):
//!
//! ```text
//! <column> <op> <value>      op: == != < <= > >=
//! <column> is null
//! <column> is not null
//! ```
//!
//! Values are typed by shape: `true`/`false` become booleans, integers and
//! floats become numbers, everything else is a string. Single or double
//! quotes around a string value are stripped, so `event == "pass_forward"`
//! and `event == pass_forward` mean the same thing.

use gridiron_pool_core::pool::predicate::{CmpOp, Literal, Predicate};

use crate::error::{CliError, CliResult};

fn invalid(spec: &str, reason: &str) -> CliError {
    CliError::InvalidFilter {
        spec: spec.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_literal(raw: &str) -> Literal {
    match raw {
        "true" => return Literal::Bool(true),
        "false" => return Literal::Bool(false),
        _ => {}
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Literal::Int(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Literal::Float(v);
    }
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(raw);
    Literal::Str(unquoted.to_string())
}

/// Parses one filter expression into a [`Predicate`].
pub fn parse_filter(spec: &str) -> CliResult<Predicate> {
    let tokens: Vec<&str> = spec.split_whitespace().collect();

    match tokens.as_slice() {
        [column, "is", "null"] => Ok(Predicate::is_null(column)),
        [column, "is", "not", "null"] => Ok(Predicate::is_not_null(column)),
        [column, op, value @ ..] if !value.is_empty() => {
            let op = match *op {
                "==" => CmpOp::Eq,
                "!=" => CmpOp::NotEq,
                "<" => CmpOp::Lt,
                "<=" => CmpOp::LtEq,
                ">" => CmpOp::Gt,
                ">=" => CmpOp::GtEq,
                other => {
                    return Err(invalid(spec, &format!("unknown operator '{other}'")));
                }
            };
            // Rejoin so string values may contain spaces.
            let literal = parse_literal(&value.join(" "));
            Ok(Predicate {
                column: column.to_string(),
                op,
                literal: Some(literal),
            })
        }
        _ => Err(invalid(
            spec,
            "expected '<column> <op> <value>' or '<column> is [not] null'",
        )),
    }
}
