use serde_json::Value;

use colony_types::ToolSchema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub tool_name: String,
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid schema `{}` at `{}`: {}",
            self.tool_name, self.path, self.reason
        )
    }
}

impl std::error::Error for SchemaError {}

/// Validate every declared parameter schema at registration time, so a
/// malformed declaration fails startup instead of a live invocation.
pub fn validate_tool_schemas(schemas: &[ToolSchema]) -> Result<(), SchemaError> {
    for schema in schemas {
        validate_node(&schema.name, "$", &schema.parameters)?;
    }
    Ok(())
}

fn validate_node(tool_name: &str, path: &str, value: &Value) -> Result<(), SchemaError> {
    let Some(obj) = value.as_object() else {
        return Ok(());
    };

    if obj.get("type").and_then(|t| t.as_str()) == Some("array") && !obj.contains_key("items") {
        return Err(SchemaError {
            tool_name: tool_name.to_string(),
            path: path.to_string(),
            reason: "array schema missing items".to_string(),
        });
    }

    if let Some(items) = obj.get("items") {
        validate_node(tool_name, &format!("{path}.items"), items)?;
    }
    if let Some(props) = obj.get("properties").and_then(|v| v.as_object()) {
        for (key, child) in props {
            validate_node(tool_name, &format!("{path}.properties.{key}"), child)?;
        }
    }
    if let Some(required) = obj.get("required") {
        if !required.is_array() {
            return Err(SchemaError {
                tool_name: tool_name.to_string(),
                path: path.to_string(),
                reason: "required must be an array".to_string(),
            });
        }
    }
    Ok(())
}

/// Check a concrete argument object against a declared parameter schema:
/// required keys present, declared types respected. Unknown keys pass
/// through untouched so tools see exactly what the model sent.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(args_obj) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };
    let properties = schema.get("properties").and_then(|v| v.as_object());

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for key in required.iter().filter_map(|v| v.as_str()) {
            if !args_obj.contains_key(key) {
                return Err(format!("missing required argument `{key}`"));
            }
        }
    }

    let Some(properties) = properties else {
        return Ok(());
    };
    for (key, value) in args_obj {
        let Some(declared) = properties.get(key) else {
            continue;
        };
        let Some(expected) = declared.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        if !type_matches(expected, value) {
            return Err(format!(
                "argument `{key}` should be {expected}, got {}",
                json_type_name(value)
            ));
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": {"type": "string"},
                "repeat": {"type": "integer"}
            },
            "required": ["value"]
        })
    }

    #[test]
    fn registration_rejects_array_without_items() {
        let schemas = vec![ToolSchema {
            name: "bad".to_string(),
            description: "bad schema".to_string(),
            parameters: json!({"type":"object","properties":{"ids":{"type":"array"}}}),
        }];
        let err = validate_tool_schemas(&schemas).unwrap_err();
        assert_eq!(err.tool_name, "bad");
        assert!(err.path.contains("properties.ids"));
    }

    #[test]
    fn args_missing_required_key_fail() {
        let err = validate_args(&echo_schema(), &json!({"repeat": 2})).unwrap_err();
        assert!(err.contains("value"));
    }

    #[test]
    fn args_with_wrong_type_fail() {
        let err = validate_args(&echo_schema(), &json!({"value": 42})).unwrap_err();
        assert!(err.contains("should be string"));
    }

    #[test]
    fn valid_args_pass_and_extra_keys_are_ignored() {
        validate_args(&echo_schema(), &json!({"value": "hi", "extra": true})).unwrap();
    }

    #[test]
    fn non_object_args_fail() {
        assert!(validate_args(&echo_schema(), &json!("hi")).is_err());
    }
}
