use async_trait::async_trait;
use serde_json::json;

use crate::context::ContextPatch;
use crate::node_api::{config_bool, config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct ExecutionControlNode;

#[async_trait]
impl NodeHandler for ExecutionControlNode {
    fn node_type(&self) -> &'static str {
        "execution-control"
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let action = config_str(&input.node_config, "action").unwrap_or_else(|| "continue".to_string());
        let mut patch = ContextPatch::default();
        let mut terminated = false;

        match action.as_str() {
            "terminate" => {
                patch.terminate = Some(true);
                terminated = true;
            }
            "terminate-if" => {
                let condition = config_bool(&input.node_config, "condition", false);
                if condition {
                    patch.terminate = Some(true);
                    terminated = true;
                }
            }
            "continue" => {}
            other => return Err(NodeExecutionError::Failed(format!("execution-control: unknown action `{other}`"))),
        }

        ctx.update_execution_context(patch);

        let mut data = input.data.clone();
        let marker = json!({"action": action, "terminated": terminated});
        if let Some(obj) = data.as_object_mut() {
            obj.insert("_execution_control".to_string(), marker);
        } else {
            data = json!({"value": data, "_execution_control": marker});
        }
        Ok(NodeOutput::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn terminate_action_requests_termination() {
        let node = ExecutionControlNode;
        let ctx = StubContext::new();
        let input = NodeInput {
            data: json!({}),
            node_config: json!({"action": "terminate"}),
        };
        let out = node.execute(&input, &ctx).await.unwrap();
        assert_eq!(out.data["_execution_control"]["terminated"], json!(true));
        assert_eq!(ctx.patches()[0].terminate, Some(true));
    }

    #[tokio::test]
    async fn terminate_if_false_does_not_terminate() {
        let node = ExecutionControlNode;
        let ctx = StubContext::new();
        let input = NodeInput {
            data: json!({}),
            node_config: json!({"action": "terminate-if", "condition": false}),
        };
        let out = node.execute(&input, &ctx).await.unwrap();
        assert_eq!(out.data["_execution_control"]["terminated"], json!(false));
    }
}
