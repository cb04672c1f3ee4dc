//! Argument validation against a tool's JSON parameter schema.
//!
//! Validation is intentionally shallow: `type` tags, `required` lists, and
//! per-property type checks, recursing into nested objects. Mismatches reject
//! the call before the underlying tool or provider is reached.

use serde_json::Value;

use crate::error::{AgentError, Result};

/// Validate `args` against `schema`, returning `TOOL_INVALID_ARGS` on the
/// first mismatch.
pub(crate) fn validate_args(tool_name: &str, schema: &Value, args: &Value) -> Result<()> {
    check_value(schema, args, "$").map_err(|msg| AgentError::tool_invalid_args(tool_name, msg))
}

fn check_value(schema: &Value, value: &Value, path: &str) -> std::result::Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str)
        && !type_matches(expected, value)
    {
        return Err(format!(
            "{path}: expected {expected}, got {}",
            type_name(value)
        ));
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    return Err(format!("{path}: missing required property '{key}'"));
                }
            }
        }

        if let Some(props) = schema_obj.get("properties").and_then(Value::as_object) {
            for (key, sub_schema) in props {
                if let Some(sub_value) = obj.get(key) {
                    check_value(sub_schema, sub_value, &format!("{path}.{key}"))?;
                }
            }

            let additional_forbidden = schema_obj
                .get("additionalProperties")
                .and_then(Value::as_bool)
                == Some(false);
            if additional_forbidden {
                for key in obj.keys() {
                    if !props.contains_key(key) {
                        return Err(format!("{path}: unexpected property '{key}'"));
                    }
                }
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema_obj.get("items"), value.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            check_value(items, item, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "null" => value.is_null(),
        _ => true,
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
