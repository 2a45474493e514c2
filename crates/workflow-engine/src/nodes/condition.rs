use async_trait::async_trait;
use common::types::JsonValue;
use serde_json::json;

use crate::node_api::{config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct ConditionNode;

fn as_f64(value: &JsonValue) -> Option<f64> {
    value.as_f64()
}

pub fn evaluate_operator(operator: &str, field: &JsonValue, expected: &JsonValue) -> bool {
    match operator {
        "equals" => field == expected,
        "not_equals" => field != expected,
        "greater_than" => matches!((as_f64(field), as_f64(expected)), (Some(a), Some(b)) if a > b),
        "less_than" => matches!((as_f64(field), as_f64(expected)), (Some(a), Some(b)) if a < b),
        "contains" => match (field.as_str(), expected.as_str()) {
            (Some(f), Some(e)) => f.contains(e),
            _ => field.as_array().map(|arr| arr.contains(expected)).unwrap_or(false),
        },
        "exists" => !field.is_null(),
        _ => false,
    }
}

#[async_trait]
impl NodeHandler for ConditionNode {
    fn node_type(&self) -> &'static str {
        "condition"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let field_path = config_str(&input.node_config, "field")
            .ok_or_else(|| NodeExecutionError::Failed("condition node requires `field`".to_string()))?;
        let operator = config_str(&input.node_config, "operator")
            .ok_or_else(|| NodeExecutionError::Failed("condition node requires `operator`".to_string()))?;
        let expected = input.node_config.get("value").cloned().unwrap_or(JsonValue::Null);

        let field_value = crate::template::resolve_value(&format!("{{{{{field_path}}}}}"), &input.data);
        let result = evaluate_operator(&operator, &field_value, &expected);

        let mut data = input.data.clone();
        if let Some(obj) = data.as_object_mut() {
            obj.insert("_condition".to_string(), json!({"result": result}));
        } else {
            data = json!({"value": data, "_condition": {"result": result}});
        }
        Ok(NodeOutput::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn equals_true_branch() {
        let node = ConditionNode;
        let input = NodeInput {
            data: json!({"status": "ready"}),
            node_config: json!({"field": "status", "operator": "equals", "value": "ready"}),
        };
        let out = node.execute(&input, &StubContext::new()).await.unwrap();
        assert_eq!(out.data["_condition"]["result"], json!(true));
    }

    #[test]
    fn greater_than_numeric_compare() {
        assert!(evaluate_operator("greater_than", &json!(5), &json!(3)));
        assert!(!evaluate_operator("greater_than", &json!(2), &json!(3)));
    }
}
