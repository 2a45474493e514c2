use crate::models::ModelProvider;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    pub usage: Usage,
    pub model: String,
    pub provider: String,
    pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("api key not configured for provider: {0}")]
    ApiKeyNotConfigured(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("provider returned an error: {0}")]
    ApiError(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("failed to parse provider response: {0}")]
    ParseError(String),
}

/// External collaborator consumed by the `llm` node. Node code depends only
/// on this trait, never on `AIClient` directly, so tests can substitute a
/// stub provider.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(
        &self,
        provider: ModelProvider,
        model: &str,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerateResponse, LlmError>;
}

/// HTTP-backed implementation dispatching to Gemini or Groq's REST APIs.
pub struct AIClient {
    client: reqwest::Client,
    api_keys: HashMap<String, String>,
}

impl AIClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_keys: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, provider: ModelProvider, api_key: String) -> Self {
        self.api_keys.insert(provider.as_str().to_string(), api_key);
        self
    }

    fn key_for(&self, provider: ModelProvider) -> Result<&str, LlmError> {
        self.api_keys
            .get(provider.as_str())
            .map(String::as_str)
            .ok_or_else(|| LlmError::ApiKeyNotConfigured(provider.as_str().to_string()))
    }

    async fn generate_gemini(
        &self,
        model: &str,
        prompt: &str,
        api_key: &str,
        options: &GenerateOptions,
        timeout: Duration,
    ) -> Result<GenerateResponse, LlmError> {
        let started = std::time::Instant::now();
        let mut contents = Vec::new();
        if let Some(system) = &options.system_prompt {
            contents.push(serde_json::json!({
                "role": "user",
                "parts": [{"text": system}]
            }));
        }
        contents.push(serde_json::json!({
            "role": "user",
            "parts": [{"text": prompt}]
        }));

        let body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": options.temperature.unwrap_or(0.7),
                "maxOutputTokens": options.max_tokens.unwrap_or(2000),
            },
        });

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={api_key}"
        );

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(common::error::sanitize(&text)));
        }

        let parsed: JsonValue = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let prompt_tokens = parsed["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32;
        let completion_tokens =
            parsed["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;

        Ok(GenerateResponse {
            content,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: model.to_string(),
            provider: ModelProvider::Gemini.as_str().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn generate_groq(
        &self,
        model: &str,
        prompt: &str,
        api_key: &str,
        options: &GenerateOptions,
        timeout: Duration,
    ) -> Result<GenerateResponse, LlmError> {
        let started = std::time::Instant::now();
        let mut messages = Vec::new();
        if let Some(system) = &options.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(0.7),
            "max_tokens": options.max_tokens.unwrap_or(2000),
        });

        let response = self
            .client
            .post("https://api.groq.com/openai/v1/chat/completions")
            .timeout(timeout)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(common::error::sanitize(&text)));
        }

        let parsed: JsonValue = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(GenerateResponse {
            content,
            usage: Usage {
                prompt_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0)
                    as u32,
                total_tokens: parsed["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32,
            },
            model: model.to_string(),
            provider: ModelProvider::Groq.as_str().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn map_reqwest_err(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(0)
    } else {
        LlmError::RequestFailed(e.to_string())
    }
}

impl Default for AIClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for AIClient {
    async fn generate(
        &self,
        provider: ModelProvider,
        model: &str,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerateResponse, LlmError> {
        let api_key = self.key_for(provider)?.to_string();
        let timeout = Duration::from_millis(options.timeout_ms.unwrap_or(30_000));
        match provider {
            ModelProvider::Gemini => {
                self.generate_gemini(model, prompt, &api_key, &options, timeout).await
            }
            ModelProvider::Groq => {
                self.generate_groq(model, prompt, &api_key, &options, timeout).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_api_key_registers_under_provider_name() {
        let client = AIClient::new().with_api_key(ModelProvider::Groq, "gsk-test".to_string());
        assert!(client.api_keys.contains_key("groq"));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_permanent_error() {
        let client = AIClient::new();
        let err = client
            .generate(ModelProvider::Gemini, "gemini-1.5-flash", "hi", GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ApiKeyNotConfigured(_)));
    }
}
