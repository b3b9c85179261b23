//! Execution context and template resolution.
//!
//! The context of an instance is an open JSON document: the trigger payload
//! at the top level, plus one entry per executed node keyed by node id.
//! Node parameters reference it through `{{expression}}` templates:
//!
//! - `{{context.member_id}}`: top-level context field (the `context.` prefix is optional)
//! - `{{check_warrant.active}}`: field of an earlier node's output
//! - `{{context.officers[0].name}}`: array index access
//!
//! Resolution is a read-only projection: no expression evaluation, no
//! side effects. Multiple templates per string are supported.

use serde_json::{Map, Value};

use crate::error::WorkflowError;

/// Instance context: string keys to arbitrary JSON values.
pub type WorkflowContext = Map<String, Value>;

/// Reserved key holding the failure detail of a failed instance.
pub const ERROR_KEY: &str = "_error";

/// Key used for trigger payloads and resume data that are not JSON objects.
pub const PAYLOAD_KEY: &str = "payload";

/// Optional root segment naming the context itself.
const CONTEXT_ROOT: &str = "context";

/// Build an initial context from a trigger payload.
///
/// Object payloads become the top level of the context; anything else is
/// kept under [`PAYLOAD_KEY`].
pub fn context_from_payload(payload: &Value) -> WorkflowContext {
    let mut ctx = WorkflowContext::new();
    merge_data(&mut ctx, payload);
    ctx
}

/// Merge resume or trigger data into a context (top-level keys overwrite).
pub fn merge_data(ctx: &mut WorkflowContext, data: &Value) {
    match data {
        Value::Object(map) => {
            for (k, v) in map {
                ctx.insert(k.clone(), v.clone());
            }
        }
        Value::Null => {}
        other => {
            ctx.insert(PAYLOAD_KEY.to_string(), other.clone());
        }
    }
}

/// Resolves `{{expression}}` templates against a context.
pub struct ContextResolver<'a> {
    data: &'a WorkflowContext,
}

impl<'a> ContextResolver<'a> {
    pub fn new(data: &'a WorkflowContext) -> Self {
        Self { data }
    }

    /// Resolve all `{{...}}` templates in a JSON value tree.
    ///
    /// Strings are resolved inline, objects and arrays recursively, other
    /// values are returned unchanged.
    pub fn resolve_value(&self, value: &Value) -> Result<Value, WorkflowError> {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (k, v) in map {
                    resolved.insert(k.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(arr) => {
                let resolved: Result<Vec<Value>, _> =
                    arr.iter().map(|v| self.resolve_value(v)).collect();
                Ok(Value::Array(resolved?))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve all `{{...}}` templates in a string.
    ///
    /// A string that is exactly one expression keeps the referenced JSON
    /// type; mixed text stringifies every expression.
    fn resolve_string(&self, s: &str) -> Result<Value, WorkflowError> {
        let expressions = parse_template_expressions(s);

        if expressions.is_empty() {
            return Ok(Value::String(s.to_string()));
        }

        if expressions.len() == 1 && expressions[0].full_match == s {
            return self.resolve_expression(&expressions[0].path);
        }

        let mut result = s.to_string();
        for expr in &expressions {
            let resolved = self.resolve_expression(&expr.path)?;
            result = result.replace(&expr.full_match, &value_to_string(&resolved));
        }

        Ok(Value::String(result))
    }

    /// Resolve a single dot-separated path expression against the context.
    fn resolve_expression(&self, path: &str) -> Result<Value, WorkflowError> {
        let mut segments = parse_path_segments(path);

        if segments.is_empty() || segments[0].name.is_empty() {
            return Err(WorkflowError::InvalidTemplate(format!(
                "empty template expression '{{{{{}}}}}'",
                path
            )));
        }

        if segments[0].name == CONTEXT_ROOT && segments[0].index.is_none() {
            if segments.len() == 1 {
                return Ok(Value::Object(self.data.clone()));
            }
            segments.remove(0);
        }

        let root = &segments[0];
        let root_value = self.data.get(root.name.as_str()).ok_or_else(|| {
            WorkflowError::InvalidTemplate(format!(
                "'{{{{{}}}}}': unknown context key '{}'",
                path, root.name
            ))
        })?;
        let mut current = match root.index {
            Some(i) => root_value.get(i).ok_or_else(|| unresolved(path, root))?,
            None => root_value,
        };

        for segment in &segments[1..] {
            current = navigate_segment(current, segment).ok_or_else(|| unresolved(path, segment))?;
        }

        Ok(current.clone())
    }
}

fn unresolved(path: &str, segment: &PathSegment) -> WorkflowError {
    WorkflowError::InvalidTemplate(format!(
        "'{{{{{}}}}}': cannot resolve segment '{}'",
        path, segment
    ))
}

// ---------------------------------------------------------------------------
// Template expression parsing
// ---------------------------------------------------------------------------

/// A parsed `{{expression}}` occurrence in a string.
#[derive(Debug)]
struct TemplateExpression {
    /// The full match including braces.
    full_match: String,
    /// The trimmed inner path.
    path: String,
}

/// Find all `{{...}}` expressions in a string.
fn parse_template_expressions(s: &str) -> Vec<TemplateExpression> {
    let mut results = Vec::new();
    let mut remaining = s;

    while let Some(start) = remaining.find("{{") {
        let Some(end) = remaining[start..].find("}}") else {
            break; // unclosed
        };
        let full_end = start + end + 2;
        let inner = remaining[start + 2..start + end].trim();

        if !inner.is_empty() {
            results.push(TemplateExpression {
                full_match: remaining[start..full_end].to_string(),
                path: inner.to_string(),
            });
        }

        remaining = &remaining[full_end..];
    }

    results
}

// ---------------------------------------------------------------------------
// Path navigation
// ---------------------------------------------------------------------------

/// A segment of a dot-separated path, optionally with an array index.
#[derive(Debug)]
struct PathSegment {
    name: String,
    index: Option<usize>,
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.name, i),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Parse `"a.b[0].c"` into `[("a", None), ("b", Some(0)), ("c", None)]`.
fn parse_path_segments(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .map(|part| {
            if let Some(bracket_start) = part.find('[')
                && let Some(bracket_end) = part.find(']')
                && bracket_end > bracket_start
            {
                return PathSegment {
                    name: part[..bracket_start].to_string(),
                    index: part[bracket_start + 1..bracket_end].parse::<usize>().ok(),
                };
            }
            PathSegment {
                name: part.to_string(),
                index: None,
            }
        })
        .collect()
}

/// Navigate one segment of a path through a JSON value.
fn navigate_segment<'a>(value: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    let field = if segment.name.is_empty() {
        value
    } else {
        value.get(&segment.name)?
    };

    match segment.index {
        Some(i) => field.get(i),
        None => Some(field),
    }
}

/// Convert a JSON value to its string representation for interpolation.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "null".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Convenience
// ---------------------------------------------------------------------------

/// Resolve all template expressions in a node's parameter map.
pub fn resolve_params(
    params: &Map<String, Value>,
    context: &WorkflowContext,
) -> Result<Map<String, Value>, WorkflowError> {
    let resolver = ContextResolver::new(context);
    let mut resolved = Map::new();
    for (key, value) in params {
        resolved.insert(key.clone(), resolver.resolve_value(value)?);
    }
    Ok(resolved)
}

/// Resolve template expressions in a single string.
pub fn resolve_template_string(
    template: &str,
    context: &WorkflowContext,
) -> Result<String, WorkflowError> {
    let resolver = ContextResolver::new(context);
    match resolver.resolve_string(template)? {
        Value::String(s) => Ok(s),
        other => Ok(value_to_string(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> WorkflowContext {
        context_from_payload(&json!({
            "member_id": 1042,
            "branch": "Barony of Stargate",
            "officers": [
                {"name": "Aelfric", "office": "Seneschal"},
                {"name": "Brigid", "office": "Herald"}
            ],
            "check_warrant": {"active": true, "expires": "2026-12-31"}
        }))
    }

    #[test]
    fn test_context_prefix_field() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert_eq!(
            resolver.resolve_expression("context.member_id").unwrap(),
            json!(1042)
        );
    }

    #[test]
    fn test_bare_field() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert_eq!(
            resolver.resolve_expression("branch").unwrap(),
            json!("Barony of Stargate")
        );
    }

    #[test]
    fn test_node_output_field() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert_eq!(
            resolver.resolve_expression("check_warrant.active").unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_array_index_access() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert_eq!(
            resolver
                .resolve_expression("context.officers[1].office")
                .unwrap(),
            json!("Herald")
        );
    }

    #[test]
    fn test_index_on_root_segment() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert_eq!(
            resolver.resolve_expression("officers[0].name").unwrap(),
            json!("Aelfric")
        );
    }

    #[test]
    fn test_whole_context() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        let all = resolver.resolve_expression("context").unwrap();
        assert_eq!(all["member_id"], json!(1042));
    }

    #[test]
    fn test_sole_expression_preserves_type() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert_eq!(
            resolver.resolve_string("{{context.member_id}}").unwrap(),
            json!(1042)
        );
    }

    #[test]
    fn test_mixed_text_is_stringified() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert_eq!(
            resolver
                .resolve_string("Member {{context.member_id}} of {{ branch }}")
                .unwrap(),
            json!("Member 1042 of Barony of Stargate")
        );
    }

    #[test]
    fn test_object_in_mixed_string_serialized() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        let result = resolver.resolve_string("Data: {{check_warrant}}").unwrap();
        let s = result.as_str().unwrap();
        assert!(s.starts_with("Data: {"));
        assert!(s.contains("expires"));
    }

    #[test]
    fn test_unknown_root_key() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        let err = resolver.resolve_expression("context.nobody").unwrap_err();
        assert!(err.to_string().contains("unknown context key 'nobody'"));
    }

    #[test]
    fn test_missing_nested_field() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        let err = resolver
            .resolve_expression("check_warrant.revoked")
            .unwrap_err();
        assert!(err.to_string().contains("cannot resolve segment"));
    }

    #[test]
    fn test_index_out_of_bounds() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert!(resolver.resolve_expression("officers[9].name").is_err());
    }

    #[test]
    fn test_unclosed_brace_left_alone() {
        let ctx = test_context();
        let resolver = ContextResolver::new(&ctx);
        assert_eq!(
            resolver.resolve_string("open {{ but no close").unwrap(),
            json!("open {{ but no close")
        );
    }

    #[test]
    fn test_resolve_params_nested() {
        let ctx = test_context();
        let params = json!({
            "member": "{{context.member_id}}",
            "notify": {"to": ["{{officers[0].name}}", "literal"]},
            "count": 3
        });
        let resolved = resolve_params(params.as_object().unwrap(), &ctx).unwrap();
        assert_eq!(resolved["member"], json!(1042));
        assert_eq!(resolved["notify"]["to"], json!(["Aelfric", "literal"]));
        assert_eq!(resolved["count"], json!(3));
    }

    #[test]
    fn test_resolve_template_string_convenience() {
        let ctx = test_context();
        assert_eq!(
            resolve_template_string("{{context.member_id}}", &ctx).unwrap(),
            "1042"
        );
    }

    #[test]
    fn test_non_object_payload_kept_under_payload_key() {
        let ctx = context_from_payload(&json!([1, 2, 3]));
        assert_eq!(ctx[PAYLOAD_KEY], json!([1, 2, 3]));
        assert!(context_from_payload(&Value::Null).is_empty());
    }

    #[test]
    fn test_merge_data_overwrites() {
        let mut ctx = test_context();
        merge_data(&mut ctx, &json!({"branch": "Shire of Bjornsborg", "extra": 1}));
        assert_eq!(ctx["branch"], json!("Shire of Bjornsborg"));
        assert_eq!(ctx["extra"], json!(1));
    }
}
