use async_trait::async_trait;
use serde_json::json;

use crate::node_api::{config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};
use crate::nodes::condition::evaluate_operator;

/// Pass/fail predicate node, otherwise identical in shape to `condition` but
/// routing via `_evaluation.passed` instead of `_condition.result` (§4.5).
pub struct EvaluationNode;

#[async_trait]
impl NodeHandler for EvaluationNode {
    fn node_type(&self) -> &'static str {
        "evaluation"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let field_path = config_str(&input.node_config, "field")
            .ok_or_else(|| NodeExecutionError::Failed("evaluation node requires `field`".to_string()))?;
        let operator = config_str(&input.node_config, "operator").unwrap_or_else(|| "exists".to_string());
        let expected = input.node_config.get("value").cloned().unwrap_or(serde_json::Value::Null);

        let field_value = crate::template::resolve_value(&format!("{{{{{field_path}}}}}"), &input.data);
        let passed = evaluate_operator(&operator, &field_value, &expected);

        let mut data = input.data.clone();
        if let Some(obj) = data.as_object_mut() {
            obj.insert("_evaluation".to_string(), json!({"passed": passed}));
        } else {
            data = json!({"value": data, "_evaluation": {"passed": passed}});
        }
        Ok(NodeOutput::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn missing_field_fails_exists_check() {
        let node = EvaluationNode;
        let input = NodeInput {
            data: json!({}),
            node_config: json!({"field": "score", "operator": "exists"}),
        };
        let out = node.execute(&input, &StubContext::new()).await.unwrap();
        assert_eq!(out.data["_evaluation"]["passed"], json!(false));
    }
}
