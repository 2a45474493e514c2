pub mod client;
pub mod models;
pub mod prompt;

pub use client::{AIClient, GenerateOptions, GenerateResponse, LLMProvider, LlmError, Usage};
pub use models::{ModelConfig, ModelError, ModelProvider};
pub use prompt::{PromptTemplate, TemplateEngine};
