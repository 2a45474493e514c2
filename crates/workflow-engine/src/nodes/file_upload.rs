use async_trait::async_trait;
use common::types::JsonValue;
use serde_json::json;

use crate::node_api::{config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct FileUploadNode;

const PREVIEW_CHARS: usize = 500;

fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

fn parse_csv(content: &str) -> JsonValue {
    let mut lines = content.lines();
    let header: Vec<&str> = lines.next().unwrap_or("").split(',').collect();
    let rows: Vec<JsonValue> = lines
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            let mut row = serde_json::Map::new();
            for (i, name) in header.iter().enumerate() {
                row.insert(name.to_string(), json!(fields.get(i).copied().unwrap_or("")));
            }
            JsonValue::Object(row)
        })
        .collect();
    json!({"header": header, "rows": rows})
}

#[async_trait]
impl NodeHandler for FileUploadNode {
    fn node_type(&self) -> &'static str {
        "file-upload"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let content = config_str(&input.node_config, "file_content")
            .ok_or_else(|| NodeExecutionError::Failed("file-upload node requires `file_content`".to_string()))?;
        let file_name = config_str(&input.node_config, "file_name").unwrap_or_default();
        let format = config_str(&input.node_config, "file_format")
            .ok_or_else(|| NodeExecutionError::Failed("file-upload node requires `file_format`".to_string()))?;

        let parsed = match format.as_str() {
            "json" => serde_json::from_str(&content)
                .map_err(|e| NodeExecutionError::Failed(format!("file-upload: invalid json: {e}")))?,
            "csv" => parse_csv(&content),
            "txt" => json!({"text": content}),
            "pdf" => json!({"unsupported": true, "reason": "pdf parsing not implemented"}),
            other => return Err(NodeExecutionError::Failed(format!("file-upload: unknown format `{other}`"))),
        };

        Ok(NodeOutput::new(json!({
            "file_name": file_name,
            "file_format": format,
            "parsed": parsed,
            "preview": preview(&content),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn parses_csv_into_rows() {
        let node = FileUploadNode;
        let input = NodeInput {
            data: json!({}),
            node_config: json!({
                "file_content": "name,age\nada,36\nalan,41",
                "file_name": "people.csv",
                "file_format": "csv",
            }),
        };
        let out = node.execute(&input, &StubContext::new()).await.unwrap();
        assert_eq!(out.data["parsed"]["rows"].as_array().unwrap().len(), 2);
    }
}
