use async_trait::async_trait;
use common::types::JsonValue;
use serde_json::json;

use crate::node_api::{config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct DataCleanerNode;

fn text_of(input: &NodeInput) -> String {
    match input.data.get("text") {
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => input.data.to_string(),
    }
}

fn mask_pii(text: &str) -> (String, Vec<String>) {
    let email_re = regex::Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    let phone_re = regex::Regex::new(r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap();
    let mut found = Vec::new();
    let mut masked = email_re
        .replace_all(text, |caps: &regex::Captures| {
            found.push(caps[0].to_string());
            "[redacted-email]"
        })
        .into_owned();
    masked = phone_re
        .replace_all(&masked, |caps: &regex::Captures| {
            found.push(caps[0].to_string());
            "[redacted-phone]"
        })
        .into_owned();
    (masked, found)
}

#[async_trait]
impl NodeHandler for DataCleanerNode {
    fn node_type(&self) -> &'static str {
        "data-cleaner"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let operations: Vec<String> = input
            .node_config
            .get("operations")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let case_type = config_str(&input.node_config, "case_type").unwrap_or_else(|| "lower".to_string());

        let mut text = text_of(input);
        let mut applied = Vec::new();
        let mut pii_found = Vec::new();

        for op in &operations {
            match op.as_str() {
                "trim" => {
                    text = text.trim().to_string();
                    applied.push(op.clone());
                }
                "normalize-case" => {
                    text = if case_type == "upper" { text.to_uppercase() } else { text.to_lowercase() };
                    applied.push(op.clone());
                }
                "remove-special-chars" => {
                    text = text.chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect();
                    applied.push(op.clone());
                }
                "remove-duplicates" => {
                    let mut seen = std::collections::HashSet::new();
                    let words: Vec<&str> = text.split_whitespace().filter(|w| seen.insert(*w)).collect();
                    text = words.join(" ");
                    applied.push(op.clone());
                }
                "validate-json" => {
                    if serde_json::from_str::<JsonValue>(&text).is_err() {
                        return Err(NodeExecutionError::Failed("data-cleaner: invalid JSON input".to_string()));
                    }
                    applied.push(op.clone());
                }
                "mask-pii" => {
                    let (masked, found) = mask_pii(&text);
                    text = masked;
                    pii_found.extend(found);
                    applied.push(op.clone());
                }
                other => {
                    tracing::warn!(operation = other, "data-cleaner: unknown operation ignored");
                }
            }
        }

        Ok(NodeOutput::new(json!({
            "cleaned": text,
            "operations_applied": applied,
            "pii_found": pii_found,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    fn input(text: &str, ops: Vec<&str>) -> NodeInput {
        NodeInput {
            data: json!({"text": text}),
            node_config: json!({"operations": ops}),
        }
    }

    #[tokio::test]
    async fn trims_and_lowercases() {
        let node = DataCleanerNode;
        let ctx = StubContext::new();
        let out = node
            .execute(&input("  HELLO  ", vec!["trim", "normalize-case"]), &ctx)
            .await
            .unwrap();
        assert_eq!(out.data["cleaned"], json!("hello"));
    }

    #[tokio::test]
    async fn masks_email_addresses() {
        let node = DataCleanerNode;
        let ctx = StubContext::new();
        let out = node
            .execute(&input("contact ada@example.com now", vec!["mask-pii"]), &ctx)
            .await
            .unwrap();
        assert!(out.data["cleaned"].as_str().unwrap().contains("[redacted-email]"));
        assert_eq!(out.data["pii_found"].as_array().unwrap().len(), 1);
    }
}
