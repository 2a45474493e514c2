use async_trait::async_trait;
use serde_json::json;

use crate::context::ContextPatch;
use crate::node_api::{config_bool, config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct StorageNode;

#[async_trait]
impl NodeHandler for StorageNode {
    fn node_type(&self) -> &'static str {
        "storage"
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let key = config_str(&input.node_config, "storage_key")
            .ok_or_else(|| NodeExecutionError::Failed("storage node requires `storage_key`".to_string()))?;
        let memory_key = format!("storage.{key}");
        ctx.set_memory(&memory_key, input.data.clone());

        if config_bool(&input.node_config, "persist_to_execution_context", true) {
            ctx.update_execution_context(ContextPatch::set_memory(memory_key.clone(), input.data.clone()));
        }

        Ok(NodeOutput::new(json!({
            "stored": true,
            "storage_key": key,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn writes_to_memory_under_storage_namespace() {
        let node = StorageNode;
        let ctx = StubContext::new();
        let input = NodeInput {
            data: json!({"a": 1}),
            node_config: json!({"storage_key": "profile"}),
        };
        node.execute(&input, &ctx).await.unwrap();
        assert_eq!(ctx.get_memory("storage.profile"), Some(json!({"a": 1})));
    }
}
