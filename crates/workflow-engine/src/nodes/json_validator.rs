use async_trait::async_trait;
use common::types::JsonValue;
use serde_json::json;

use crate::node_api::{config_bool, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct JsonValidatorNode;

fn type_matches(value: &JsonValue, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[async_trait]
impl NodeHandler for JsonValidatorNode {
    fn node_type(&self) -> &'static str {
        "json-validator"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let strict = config_bool(&input.node_config, "strict", false);
        let mut errors = Vec::new();

        if let Some(required) = input.node_config.get("required_fields").and_then(|v| v.as_array()) {
            for field in required {
                if let Some(name) = field.as_str() {
                    if input.data.get(name).is_none() {
                        errors.push(format!("missing required field: {name}"));
                    }
                }
            }
        }

        if let Some(field_types) = input.node_config.get("field_types").and_then(|v| v.as_object()) {
            for (field, expected) in field_types {
                if let Some(expected) = expected.as_str() {
                    if let Some(actual) = input.data.get(field) {
                        if !type_matches(actual, expected) {
                            errors.push(format!("field `{field}` expected type `{expected}`"));
                        }
                    }
                }
            }
        }

        let valid = errors.is_empty();
        if strict && !valid {
            return Err(NodeExecutionError::Failed(format!(
                "json-validator: strict validation failed: {}",
                errors.join("; ")
            )));
        }

        let mut data = input.data.clone();
        if let Some(obj) = data.as_object_mut() {
            obj.insert("_validation".to_string(), json!({"valid": valid, "errors": errors}));
        } else {
            data = json!({"value": data, "_validation": {"valid": valid, "errors": errors}});
        }
        Ok(NodeOutput::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn flags_missing_required_field() {
        let node = JsonValidatorNode;
        let input = NodeInput {
            data: json!({"a": 1}),
            node_config: json!({"required_fields": ["a", "b"]}),
        };
        let out = node.execute(&input, &StubContext::new()).await.unwrap();
        assert_eq!(out.data["_validation"]["valid"], json!(false));
    }

    #[tokio::test]
    async fn strict_mode_errors_instead_of_annotating() {
        let node = JsonValidatorNode;
        let input = NodeInput {
            data: json!({}),
            node_config: json!({"required_fields": ["a"], "strict": true}),
        };
        let result = node.execute(&input, &StubContext::new()).await;
        assert!(result.is_err());
    }
}
