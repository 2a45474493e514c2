use async_trait::async_trait;

use crate::node_api::{config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};
use crate::sandbox;

pub struct CodeNode;

#[async_trait]
impl NodeHandler for CodeNode {
    fn node_type(&self) -> &'static str {
        "code"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let code = config_str(&input.node_config, "code")
            .ok_or_else(|| NodeExecutionError::Failed("code node requires `code`".to_string()))?;
        let data = sandbox::evaluate(&code, &input.data)
            .map_err(|e| NodeExecutionError::Failed(format!("code node: {e}")))?;
        Ok(NodeOutput::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;
    use serde_json::json;

    #[tokio::test]
    async fn evaluates_lua_expression() {
        let node = CodeNode;
        let input = NodeInput {
            data: json!({"x": 2}),
            node_config: json!({"code": "return input.x + 1"}),
        };
        let out = node.execute(&input, &StubContext::new()).await.unwrap();
        assert_eq!(out.data, json!(3));
    }
}
