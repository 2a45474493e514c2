use ai_service::{GenerateOptions, ModelProvider};
use async_trait::async_trait;
use serde_json::json;
use tera::{Context as TeraContext, Tera};

use crate::node_api::{
    config_f64, config_str, config_u32, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput,
    ValidationOutcome,
};

pub struct LlmNode;

fn build_prompt(input: &NodeInput) -> Result<String, NodeExecutionError> {
    if let Some(template) = config_str(&input.node_config, "prompt_template") {
        let mut ctx = TeraContext::new();
        if let Some(obj) = input.data.as_object() {
            for (k, v) in obj {
                ctx.insert(k, v);
            }
        }
        return Tera::one_off(&template, &ctx, true)
            .map_err(|e| NodeExecutionError::Failed(format!("prompt_template: {e}")));
    }
    config_str(&input.node_config, "prompt")
        .ok_or_else(|| NodeExecutionError::Failed("llm node requires `prompt` or `prompt_template`".to_string()))
}

#[async_trait]
impl NodeHandler for LlmNode {
    fn node_type(&self) -> &'static str {
        "llm"
    }

    fn validate(&self, config: &common::types::JsonValue) -> ValidationOutcome {
        let mut errors = Vec::new();
        match config.get("provider").and_then(|v| v.as_str()) {
            Some(p) if ModelProvider::parse(p).is_some() => {}
            _ => errors.push("llm node requires provider ∈ {gemini, groq}".to_string()),
        }
        if config.get("prompt").is_none() && config.get("prompt_template").is_none() {
            errors.push("llm node requires `prompt` or `prompt_template`".to_string());
        }
        ValidationOutcome::errors(errors)
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let provider_name = config_str(&input.node_config, "provider")
            .ok_or_else(|| NodeExecutionError::Failed("llm node requires `provider`".to_string()))?;
        let provider = ModelProvider::parse(&provider_name)
            .ok_or_else(|| NodeExecutionError::Failed(format!("unknown llm provider: {provider_name}")))?;
        let model = config_str(&input.node_config, "model").unwrap_or_else(|| provider.default_model().to_string());
        let prompt = build_prompt(input)?;

        let options = GenerateOptions {
            max_tokens: Some(config_u32(&input.node_config, "max_tokens", 1024)),
            temperature: Some(config_f64(&input.node_config, "temperature", 0.7) as f32),
            timeout_ms: Some(config_u32(&input.node_config, "timeout_ms", 30_000) as u64),
            system_prompt: config_str(&input.node_config, "system_prompt"),
        };

        let response = ctx.llm_generate(provider, &model, &prompt, options).await?;

        Ok(NodeOutput::new(json!({
            "content": response.content,
            "usage": {
                "prompt_tokens": response.usage.prompt_tokens,
                "completion_tokens": response.usage.completion_tokens,
                "total_tokens": response.usage.total_tokens,
            },
            "model": response.model,
            "provider": response.provider,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_provider() {
        let node = LlmNode;
        let outcome = node.validate(&json!({"prompt": "hi"}));
        assert!(!outcome.valid);
    }

    #[test]
    fn validate_accepts_prompt_template() {
        let node = LlmNode;
        let outcome = node.validate(&json!({"provider": "gemini", "prompt_template": "hi {{name}}"}));
        assert!(outcome.valid);
    }
}
