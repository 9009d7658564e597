//! Dotted/indexed path queries over [`Value`], plus the minimal comparison
//! grammar used by `if` expressions.
//!
//! Grammar: `segment ('.' segment)*` where `segment := ident ('[' digits ']')*`.
//! A missing path resolves to `Value::Null` rather than erroring; only a
//! malformed path (bad syntax) is an error.

use crate::error::ConditionEvalError;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<Segment>, ConditionEvalError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ConditionEvalError::InvalidPath(path.to_string()));
    }
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        let mut rest = dotted;
        if rest.is_empty() {
            return Err(ConditionEvalError::InvalidPath(path.to_string()));
        }
        // Pull off a leading field name before any `[idx]` suffixes.
        let field_end = rest.find('[').unwrap_or(rest.len());
        let field = &rest[..field_end];
        if !field.is_empty() {
            segments.push(Segment::Field(field.to_string()));
        }
        rest = &rest[field_end..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .ok_or_else(|| ConditionEvalError::InvalidPath(path.to_string()))?;
            let idx_str = &stripped[..close];
            let idx: usize = idx_str
                .parse()
                .map_err(|_| ConditionEvalError::InvalidPath(path.to_string()))?;
            segments.push(Segment::Index(idx));
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return Err(ConditionEvalError::InvalidPath(path.to_string()));
        }
    }
    if segments.is_empty() {
        return Err(ConditionEvalError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Resolves a dotted/indexed path against `ctx`. A path that traverses into
/// a missing field or out-of-range index resolves to `None` (the caller
/// treats that as `Value::Null`), never an error.
pub fn resolve(ctx: &Value, path: &str) -> Result<Option<Value>, ConditionEvalError> {
    let segments = parse_path(path)?;
    let mut current = ctx;
    for seg in &segments {
        let next = match seg {
            Segment::Field(name) => current.get(name),
            Segment::Index(idx) => current.get_index(*idx),
        };
        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current.clone()))
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Evaluates an `if` expression: either a bare path (truthiness of the
/// resolved value) or `<path> <op> <literal>` with op in
/// `==, !=, >, >=, <, <=`. Literals are a number, `true`/`false`, `null`, or
/// a single/double-quoted string.
pub fn eval_condition(expr: &str, ctx: &Value) -> Result<bool, ConditionEvalError> {
    let expr = expr.trim();
    if let Some((path, op, literal)) = split_comparison(expr) {
        let resolved = resolve(ctx, path)?.unwrap_or(Value::Null);
        let literal = parse_literal(literal)?;
        Ok(compare(&resolved, &op, &literal))
    } else {
        let resolved = resolve(ctx, expr)?.unwrap_or(Value::Null);
        Ok(resolved.is_truthy())
    }
}

fn split_comparison(expr: &str) -> Option<(&str, Op, &str)> {
    const OPERATORS: [(&str, Op); 6] = [
        ("==", Op::Eq),
        ("!=", Op::Ne),
        (">=", Op::Gte),
        ("<=", Op::Lte),
        (">", Op::Gt),
        ("<", Op::Lt),
    ];
    for (token, op) in OPERATORS {
        if let Some(idx) = expr.find(token) {
            let left = expr[..idx].trim();
            let right = expr[idx + token.len()..].trim();
            if !left.is_empty() && !right.is_empty() {
                return Some((left, op, right));
            }
        }
    }
    None
}

fn parse_literal(literal: &str) -> Result<Value, ConditionEvalError> {
    let literal = literal.trim();
    if literal == "true" {
        return Ok(Value::Bool(true));
    }
    if literal == "false" {
        return Ok(Value::Bool(false));
    }
    if literal == "null" {
        return Ok(Value::Null);
    }
    if (literal.starts_with('\'') && literal.ends_with('\'') && literal.len() >= 2)
        || (literal.starts_with('"') && literal.ends_with('"') && literal.len() >= 2)
    {
        return Ok(Value::Str(literal[1..literal.len() - 1].to_string()));
    }
    if let Ok(n) = literal.parse::<f64>() {
        return Ok(Value::Num(n));
    }
    Err(ConditionEvalError::InvalidLiteral(literal.to_string()))
}

fn compare(left: &Value, op: &Op, right: &Value) -> bool {
    match op {
        Op::Eq => values_equal(left, right),
        Op::Ne => !values_equal(left, right),
        Op::Gt | Op::Gte | Op::Lt | Op::Lte => match (left.as_num(), right.as_num()) {
            (Some(l), Some(r)) => match op {
                Op::Gt => l > r,
                Op::Gte => l >= r,
                Op::Lt => l < r,
                Op::Lte => l <= r,
                _ => unreachable!(),
            },
            _ => false,
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}
