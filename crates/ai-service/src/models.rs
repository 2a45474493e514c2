use serde::{Deserialize, Serialize};

/// LLM providers supported by the `llm` node. Both are plain HTTP JSON APIs;
/// the node never talks to a provider SDK directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Gemini,
    Groq,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::Gemini => "gemini",
            ModelProvider::Groq => "groq",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ModelProvider::Gemini => "gemini-1.5-flash",
            ModelProvider::Groq => "llama-3.1-8b-instant",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "gemini" => Some(ModelProvider::Gemini),
            "groq" => Some(ModelProvider::Groq),
            _ => None,
        }
    }
}

/// Resolved per-call model configuration, after config defaults are applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ModelError::InvalidParameter(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ModelError::InvalidParameter(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_providers() {
        assert_eq!(ModelProvider::parse("gemini"), Some(ModelProvider::Gemini));
        assert_eq!(ModelProvider::parse("groq"), Some(ModelProvider::Groq));
        assert_eq!(ModelProvider::parse("openai"), None);
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let config = ModelConfig {
            provider: ModelProvider::Gemini,
            model: "gemini-1.5-flash".to_string(),
            temperature: 3.0,
            max_tokens: 100,
        };
        assert!(config.validate().is_err());
    }
}
