use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::node_api::{config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct LogNode;

#[async_trait]
impl NodeHandler for LogNode {
    fn node_type(&self) -> &'static str {
        "log"
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let level = config_str(&input.node_config, "level").unwrap_or_else(|| "info".to_string());
        let message = config_str(&input.node_config, "message").unwrap_or_else(|| input.data.to_string());
        let timestamp = Utc::now();

        match level.as_str() {
            "error" => tracing::error!(node_id = %ctx.node_id(), %message, "log node"),
            "warn" => tracing::warn!(node_id = %ctx.node_id(), %message, "log node"),
            "debug" => tracing::debug!(node_id = %ctx.node_id(), %message, "log node"),
            _ => tracing::info!(node_id = %ctx.node_id(), %message, "log node"),
        }

        Ok(NodeOutput::new(json!({
            "logged": true,
            "level": level,
            "message": message,
            "timestamp": timestamp.to_rfc3339(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn defaults_to_info_level() {
        let node = LogNode;
        let input = NodeInput { data: json!({}), node_config: json!({"message": "hi"}) };
        let out = node.execute(&input, &StubContext::new()).await.unwrap();
        assert_eq!(out.data["level"], json!("info"));
    }
}
