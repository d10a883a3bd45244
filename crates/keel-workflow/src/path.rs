//! Execution-state paths and placeholder rendering
//!
//! Step configs reference accumulated execution state with
//! `{{path.to.value}}` placeholders. Resolution is explicit: a path that
//! does not exist is an error, never silently left as literal placeholder
//! text.

use thiserror::Error;

/// Path resolution error.
#[derive(Debug, Error)]
pub enum PathError {
    /// The dotted path does not resolve in the scope value
    #[error("Path not found: {path}")]
    NotFound { path: String },
}

/// Resolve a dotted path against a scope value.
///
/// Object fields are looked up by key; array elements by numeric segment
/// (`steps.check.errors.0`).
pub fn lookup<'a>(scope: &'a serde_json::Value, path: &str) -> Result<&'a serde_json::Value, PathError> {
    let mut current = scope;
    for segment in path.split('.') {
        let next = match current {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        };
        current = next.ok_or_else(|| PathError::NotFound {
            path: path.to_string(),
        })?;
    }
    Ok(current)
}

/// Truthiness of a resolved value, for conditional branching.
pub fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty() && s != "false",
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(_) => true,
    }
}

/// Render a step config against a scope, resolving every `{{path}}`
/// placeholder.
///
/// A string that is exactly one placeholder resolves to the referenced
/// value with its type preserved; placeholders embedded in longer strings
/// are interpolated as text. Arrays and objects are rendered recursively.
pub fn render(
    config: &serde_json::Value,
    scope: &serde_json::Value,
) -> Result<serde_json::Value, PathError> {
    match config {
        serde_json::Value::String(s) => render_string(s, scope),
        serde_json::Value::Array(items) => {
            let rendered: Result<Vec<_>, _> = items.iter().map(|v| render(v, scope)).collect();
            Ok(serde_json::Value::Array(rendered?))
        }
        serde_json::Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                rendered.insert(key.clone(), render(value, scope)?);
            }
            Ok(serde_json::Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(
    template: &str,
    scope: &serde_json::Value,
) -> Result<serde_json::Value, PathError> {
    // Whole-string placeholder: preserve the resolved value's type.
    if let Some(path) = whole_placeholder(template) {
        return lookup(scope, path).cloned();
    }

    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated braces are literal text.
            output.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let path = after[..end].trim();
        let value = lookup(scope, path)?;
        match value {
            serde_json::Value::String(s) => output.push_str(s),
            other => output.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    output.push_str(rest);
    Ok(serde_json::Value::String(output))
}

/// The inner path when the template is exactly one `{{…}}` placeholder.
fn whole_placeholder(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> serde_json::Value {
        json!({
            "trigger": {
                "venture_id": "v-1",
                "founder": {"name": "Dana", "email": "dana@acme.dev"},
                "valuation": 1500000,
                "active": true
            },
            "steps": {
                "check": {"valid": true, "errors": ["missing-ein"]}
            }
        })
    }

    #[test]
    fn test_lookup_nested() {
        let scope = scope();
        assert_eq!(
            lookup(&scope, "trigger.founder.name").unwrap(),
            &json!("Dana")
        );
        assert_eq!(
            lookup(&scope, "steps.check.errors.0").unwrap(),
            &json!("missing-ein")
        );
    }

    #[test]
    fn test_lookup_missing_is_error() {
        let scope = scope();
        let err = lookup(&scope, "trigger.founder.phone").unwrap_err();
        assert!(matches!(err, PathError::NotFound { path } if path == "trigger.founder.phone"));
        assert!(lookup(&scope, "steps.check.errors.7").is_err());
    }

    #[test]
    fn test_render_preserves_type_for_whole_placeholder() {
        let scope = scope();
        let config = json!({
            "amount": "{{trigger.valuation}}",
            "active": "{{trigger.active}}",
            "founder": "{{trigger.founder}}"
        });

        let rendered = render(&config, &scope).unwrap();
        assert_eq!(rendered["amount"], json!(1500000));
        assert_eq!(rendered["active"], json!(true));
        assert_eq!(rendered["founder"]["email"], json!("dana@acme.dev"));
    }

    #[test]
    fn test_render_interpolates_embedded_placeholders() {
        let scope = scope();
        let config = json!({
            "subject": "Welcome {{trigger.founder.name}} ({{trigger.venture_id}})"
        });

        let rendered = render(&config, &scope).unwrap();
        assert_eq!(rendered["subject"], json!("Welcome Dana (v-1)"));
    }

    #[test]
    fn test_render_missing_path_is_error_not_literal() {
        let scope = scope();
        let config = json!({"to": "{{trigger.founder.phone}}"});
        let err = render(&config, &scope).unwrap_err();
        assert!(matches!(err, PathError::NotFound { .. }));
    }

    #[test]
    fn test_render_nested_structures() {
        let scope = scope();
        let config = json!({
            "payload": {
                "ids": ["{{trigger.venture_id}}"],
                "checked": "{{steps.check.valid}}"
            },
            "fixed": 42
        });

        let rendered = render(&config, &scope).unwrap();
        assert_eq!(rendered["payload"]["ids"], json!(["v-1"]));
        assert_eq!(rendered["payload"]["checked"], json!(true));
        assert_eq!(rendered["fixed"], json!(42));
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("yes")));
        assert!(truthy(&json!({"any": "object"})));
        assert!(truthy(&json!(["x"])));

        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!("false")));
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!([])));
    }
}
