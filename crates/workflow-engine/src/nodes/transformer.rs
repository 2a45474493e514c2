use async_trait::async_trait;
use serde_json::json;

use crate::node_api::{config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};
use crate::template;

pub struct TransformerNode;

#[async_trait]
impl NodeHandler for TransformerNode {
    fn node_type(&self) -> &'static str {
        "transformer"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        if let Some(expression) = config_str(&input.node_config, "expression") {
            let resolved = template::resolve_value(&expression, &input.data);
            return Ok(NodeOutput::new(resolved));
        }

        if let Some(mappings) = input.node_config.get("mappings").and_then(|v| v.as_object()) {
            let mut out = serde_json::Map::new();
            for (out_key, in_path) in mappings {
                let in_path = in_path
                    .as_str()
                    .ok_or_else(|| NodeExecutionError::Failed(format!("mapping for `{out_key}` must be a string path")))?;
                let value = template::resolve_value(&format!("{{{{{in_path}}}}}"), &input.data);
                out.insert(out_key.clone(), value);
            }
            return Ok(NodeOutput::new(json!(out)));
        }

        Err(NodeExecutionError::Failed(
            "transformer node requires `expression` or `mappings`".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn remaps_fields_via_mappings() {
        let node = TransformerNode;
        let input = NodeInput {
            data: json!({"user": {"name": "ada"}}),
            node_config: json!({"mappings": {"full_name": "user.name"}}),
        };
        let out = node.execute(&input, &StubContext::new()).await.unwrap();
        assert_eq!(out.data["full_name"], json!("ada"));
    }
}
