use async_trait::async_trait;
use common::types::JsonValue;
use serde_json::json;

use crate::context::ContextPatch;
use crate::node_api::{config_bool, config_f64, config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};
use crate::template;

pub struct MemoryWriteNode;

fn resolve_value(input: &NodeInput, ctx: &dyn NodeContext) -> Result<JsonValue, NodeExecutionError> {
    if let Some(template_str) = config_str(&input.node_config, "value_template") {
        return Ok(template::resolve_value(&template_str, &input.data));
    }
    if let Some(path) = config_str(&input.node_config, "value_path") {
        return Ok(template::resolve_value(&format!("{{{{{path}}}}}"), &input.data));
    }
    if let Some(value) = input.node_config.get("value") {
        return Ok(value.clone());
    }
    let _ = ctx;
    Err(NodeExecutionError::Failed(
        "memory-write node requires one of `value`, `value_path`, `value_template`".to_string(),
    ))
}

#[async_trait]
impl NodeHandler for MemoryWriteNode {
    fn node_type(&self) -> &'static str {
        "memory-write"
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let key = config_str(&input.node_config, "memory_key")
            .ok_or_else(|| NodeExecutionError::Failed("memory-write node requires `memory_key`".to_string()))?;
        let operation = config_str(&input.node_config, "operation").unwrap_or_else(|| "set".to_string());

        let new_value = match operation.as_str() {
            "set" => resolve_value(input, ctx)?,
            "append" => {
                let addition = resolve_value(input, ctx)?;
                let mut current = ctx.get_memory(&key).unwrap_or_else(|| json!([]));
                match current.as_array_mut() {
                    Some(arr) => {
                        arr.push(addition);
                        current
                    }
                    None => json!([addition]),
                }
            }
            "increment" => {
                let by = config_f64(&input.node_config, "increment_by", 1.0);
                let current = ctx.get_memory(&key).and_then(|v| v.as_f64()).unwrap_or(0.0);
                json!(current + by)
            }
            other => return Err(NodeExecutionError::Failed(format!("memory-write: unknown operation `{other}`"))),
        };

        ctx.set_memory(&key, new_value.clone());
        ctx.update_execution_context(ContextPatch::set_memory(key.clone(), new_value.clone()));

        let mut data = input.data.clone();
        let marker = json!({"memory_key": key, "operation": operation, "value": new_value});
        if config_bool(&input.node_config, "include_in_output", true) {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("_memory_write".to_string(), marker);
            } else {
                data = json!({"value": data, "_memory_write": marker});
            }
        }
        Ok(NodeOutput::new(data))
    }
}

pub struct MemoryReadNode;

#[async_trait]
impl NodeHandler for MemoryReadNode {
    fn node_type(&self) -> &'static str {
        "memory-read"
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let key = config_str(&input.node_config, "memory_key")
            .ok_or_else(|| NodeExecutionError::Failed("memory-read node requires `memory_key`".to_string()))?;
        let required = config_bool(&input.node_config, "required", false);
        let output_key = config_str(&input.node_config, "output_key").unwrap_or_else(|| key.clone());

        let value = match ctx.get_memory(&key) {
            Some(v) => v,
            None if required => {
                return Err(NodeExecutionError::Failed(format!("memory-read: required key `{key}` not set")))
            }
            None => input.node_config.get("default_value").cloned().unwrap_or(JsonValue::Null),
        };

        let mut data = input.data.clone();
        let obj = data.as_object_mut().ok_or_else(|| {
            NodeExecutionError::Failed("memory-read node expects an object input".to_string())
        })?;
        obj.insert(output_key, value.clone());
        obj.insert("_memory_read".to_string(), json!({"memory_key": key, "found": !value.is_null()}));
        Ok(NodeOutput::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn increment_accumulates_across_calls() {
        let node = MemoryWriteNode;
        let ctx = StubContext::new();
        let input = NodeInput {
            data: json!({}),
            node_config: json!({"memory_key": "counter", "operation": "increment", "increment_by": 2}),
        };
        node.execute(&input, &ctx).await.unwrap();
        node.execute(&input, &ctx).await.unwrap();
        assert_eq!(ctx.get_memory("counter"), Some(json!(4.0)));
    }

    #[tokio::test]
    async fn missing_required_key_fails() {
        let node = MemoryReadNode;
        let ctx = StubContext::new();
        let input = NodeInput {
            data: json!({}),
            node_config: json!({"memory_key": "missing", "required": true}),
        };
        assert!(node.execute(&input, &ctx).await.is_err());
    }
}
