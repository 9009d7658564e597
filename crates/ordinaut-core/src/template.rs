//! `${path}` template substitution over [`Value`]. Pure and deterministic:
//! no side effects, same inputs always produce the same output.

use crate::error::TemplateRenderError;
use crate::path;
use crate::value::Value;

/// Renders every `${...}` occurrence in `input` against `ctx`.
///
/// A string whose entire content is a single `${...}` expression substitutes
/// the resolved value's native type (object, array, number, ...). A string
/// containing a mix of literal text and `${...}` occurrences stringifies
/// each resolved value and concatenates. Non-string values pass through
/// unchanged, recursing into arrays and objects.
pub fn render(input: &Value, ctx: &Value) -> Result<Value, TemplateRenderError> {
    match input {
        Value::Str(s) => render_str(s, ctx),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render(item, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), render(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn render_str(s: &str, ctx: &Value) -> Result<Value, TemplateRenderError> {
    let Some(whole) = whole_field_expr(s) else {
        return Ok(Value::Str(render_mixed(s, ctx)?));
    };
    Ok(resolve_expr(whole, ctx)?)
}

/// If `s` is exactly one `${...}` with no surrounding text, returns the
/// inner path expression.
fn whole_field_expr(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.starts_with("${") && s.ends_with('}') && s[2..s.len() - 1].find("${").is_none() {
        Some(&s[2..s.len() - 1])
    } else {
        None
    }
}

fn resolve_expr(expr: &str, ctx: &Value) -> Result<Value, TemplateRenderError> {
    if expr == "now" {
        return Ok(ctx.get("now").cloned().unwrap_or(Value::Null));
    }
    Ok(path::resolve(ctx, expr)?.unwrap_or(Value::Null))
}

fn render_mixed(s: &str, ctx: &Value) -> Result<String, TemplateRenderError> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    loop {
        let Some(start) = rest.find("${") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(TemplateRenderError::Unterminated(s.to_string()));
        };
        let expr = &after[..end];
        let resolved = resolve_expr(expr, ctx)?;
        out.push_str(&resolved.render_as_string());
        rest = &after[end + 1..];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_ctx() -> Value {
        let mut w = BTreeMap::new();
        w.insert("temp".to_string(), Value::Num(15.0));
        w.insert("summary".to_string(), Value::Str("Sunny".to_string()));
        let mut steps = BTreeMap::new();
        steps.insert("w".to_string(), Value::Object(w));
        let mut params = BTreeMap::new();
        params.insert("city".to_string(), Value::Str("Chisinau".to_string()));
        let mut ctx = BTreeMap::new();
        ctx.insert("params".to_string(), Value::Object(params));
        ctx.insert("steps".to_string(), Value::Object(steps));
        ctx.insert("now".to_string(), Value::Str("2025-01-01T00:00:00Z".to_string()));
        Value::Object(ctx)
    }

    #[test]
    fn whole_field_preserves_type() {
        let ctx = sample_ctx();
        let rendered = render(&Value::from("${params.city}"), &ctx).unwrap();
        assert_eq!(rendered, Value::Str("Chisinau".to_string()));

        let rendered = render(&Value::from("${steps.w.temp}"), &ctx).unwrap();
        assert_eq!(rendered, Value::Num(15.0));
    }

    #[test]
    fn mixed_string_stringifies_and_concatenates() {
        let ctx = sample_ctx();
        let rendered = render(
            &Value::from("${steps.w.summary} ${steps.w.temp}°C"),
            &ctx,
        )
        .unwrap();
        assert_eq!(rendered, Value::Str("Sunny 15°C".to_string()));
    }

    #[test]
    fn no_placeholders_is_identity() {
        let ctx = sample_ctx();
        let rendered = render(&Value::from("just text"), &ctx).unwrap();
        assert_eq!(rendered, Value::Str("just text".to_string()));
    }

    #[test]
    fn missing_path_renders_null_whole_field() {
        let ctx = sample_ctx();
        let rendered = render(&Value::from("${missing.path}"), &ctx).unwrap();
        assert_eq!(rendered, Value::Null);
    }

    #[test]
    fn missing_path_renders_empty_in_mixed_string() {
        let ctx = sample_ctx();
        let rendered = render(&Value::from("x=${missing.path}y"), &ctx).unwrap();
        assert_eq!(rendered, Value::Str("x=y".to_string()));
    }

    #[test]
    fn now_resolves_to_execution_start() {
        let ctx = sample_ctx();
        let rendered = render(&Value::from("${now}"), &ctx).unwrap();
        assert_eq!(rendered, Value::Str("2025-01-01T00:00:00Z".to_string()));
    }

    #[test]
    fn unterminated_expression_is_an_error() {
        let ctx = sample_ctx();
        assert!(render(&Value::from("${params.city"), &ctx).is_err());
    }

    #[test]
    fn recurses_into_nested_object() {
        let ctx = sample_ctx();
        let mut input = BTreeMap::new();
        input.insert("location".to_string(), Value::from("${params.city}"));
        let rendered = render(&Value::Object(input), &ctx).unwrap();
        assert_eq!(rendered.get("location"), Some(&Value::Str("Chisinau".to_string())));
    }
}
