use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::node_api::{NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct OutputNode;

#[async_trait]
impl NodeHandler for OutputNode {
    fn node_type(&self) -> &'static str {
        "output"
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let mut data = input.data.clone();
        let marker = json!({
            "collected_at": Utc::now().to_rfc3339(),
            "execution_id": ctx.execution_id().to_string(),
            "workflow_id": ctx.workflow_id().to_string(),
        });
        if let Some(obj) = data.as_object_mut() {
            obj.insert("_output".to_string(), marker);
        } else {
            data = json!({"value": data, "_output": marker});
        }
        Ok(NodeOutput::new(data))
    }
}
