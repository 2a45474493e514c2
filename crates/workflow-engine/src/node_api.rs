use async_trait::async_trait;
use common::types::JsonValue;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::ContextPatch;

/// Input assembled by the runner from active-parent outputs (§4.2).
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub data: JsonValue,
    pub node_config: JsonValue,
}

/// Output returned by a node's `execute`. `metadata` carries retry directives
/// and route hints (`_route`/`_branch.route`) read back by the runner.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub data: JsonValue,
    pub metadata: Option<JsonValue>,
}

impl NodeOutput {
    pub fn new(data: JsonValue) -> Self {
        Self { data, metadata: None }
    }

    pub fn retry_requested(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("retry"))
            .and_then(|r| r.get("requested"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn retry_reason(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("retry"))
            .and_then(|r| r.get("reason"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self { valid: true, errors: vec![] }
    }

    pub fn errors(errors: Vec<String>) -> Self {
        Self { valid: errors.is_empty(), errors }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeExecutionError {
    #[error("{0}")]
    Failed(String),
    #[error("required capability missing: {0}")]
    CapabilityMissing(String),
}

/// A single retrieval attempt as recorded against `ExecutionRetrievalEvent`.
#[derive(Debug, Clone)]
pub struct RetrievalAttemptRecord {
    pub retriever_key: String,
    pub strategy: String,
    pub branch_index: u32,
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: common::types::RetrievalEventStatus,
    pub matches_count: u32,
    pub duration_ms: i64,
    pub selected: bool,
    pub error_message: Option<String>,
    pub query: String,
    pub top_k: u32,
    pub scope_type: Option<String>,
    pub corpus_id: Option<Uuid>,
}

/// Services a node's `execute` may reach for: secrets, memory, context
/// mutation, and (when the engine was started with knowledge wired in)
/// ingestion/retrieval. Built fresh per node invocation by the runner.
#[async_trait]
pub trait NodeContext: Send + Sync {
    fn execution_id(&self) -> Uuid;
    fn workflow_id(&self) -> Uuid;
    fn node_id(&self) -> Uuid;
    fn node_type(&self) -> &str;

    async fn get_api_key(&self, provider: &str) -> Result<String, NodeExecutionError>;

    async fn llm_generate(
        &self,
        provider: ai_service::ModelProvider,
        model: &str,
        prompt: &str,
        options: ai_service::GenerateOptions,
    ) -> Result<ai_service::GenerateResponse, NodeExecutionError>;

    fn get_memory(&self, key: &str) -> Option<JsonValue>;
    fn set_memory(&self, key: &str, value: JsonValue);

    fn get_knowledge(&self, key: &str) -> Option<JsonValue>;

    /// Current cumulative retrieval counters/bounds, read before each
    /// retrieval attempt so the orchestrator can enforce §4.4's budget.
    fn retrieval_budget(&self) -> common::types::RetrievalState;

    /// Queue a patch to be applied to the live context and flushed to a
    /// `step` snapshot once the node terminates (§4.2).
    fn update_execution_context(&self, patch: ContextPatch);

    async fn ingest_knowledge(
        &self,
        corpus_id: Uuid,
        user_id: Uuid,
        title: String,
        content_text: String,
    ) -> Result<knowledge_service::IngestionOutcome, NodeExecutionError>;

    async fn retrieve_knowledge(
        &self,
        retriever_key: &str,
        query: &str,
        top_k: usize,
        corpus_id: Option<Uuid>,
        scope_type: Option<common::types::CorpusScopeType>,
    ) -> Result<Vec<knowledge_service::ScoredChunk>, NodeExecutionError>;

    fn on_retrieval_event(&self, record: RetrievalAttemptRecord);
}

#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn node_type(&self) -> &'static str;

    fn validate(&self, config: &JsonValue) -> ValidationOutcome {
        let _ = config;
        ValidationOutcome::ok()
    }

    async fn execute(
        &self,
        input: &NodeInput,
        ctx: &dyn NodeContext,
    ) -> Result<NodeOutput, NodeExecutionError>;
}

pub fn config_get<'a>(config: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    config.get(key)
}

pub fn config_str(config: &JsonValue, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

pub fn config_bool(config: &JsonValue, key: &str, default: bool) -> bool {
    config.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn config_u32(config: &JsonValue, key: &str, default: u32) -> u32 {
    config
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

pub fn config_u64(config: &JsonValue, key: &str, default: u64) -> u64 {
    config.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

pub fn config_f64(config: &JsonValue, key: &str, default: f64) -> f64 {
    config.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// Derives route tokens from a node's output per §4.2.
pub fn derive_route_tokens(output: &NodeOutput) -> Vec<String> {
    if let Some(result) = output.data.get("_condition").and_then(|c| c.get("result")) {
        if let Some(b) = result.as_bool() {
            return vec![b.to_string()];
        }
    }
    if let Some(passed) = output.data.get("_evaluation").and_then(|e| e.get("passed")) {
        if let Some(b) = passed.as_bool() {
            return vec![if b { "pass".to_string() } else { "fail".to_string() }];
        }
    }
    if let Some(route) = output.data.get("_route").and_then(|v| v.as_str()) {
        return vec![route.to_string()];
    }
    if let Some(route) = output
        .data
        .get("_branch")
        .and_then(|b| b.get("route"))
        .and_then(|v| v.as_str())
    {
        return vec![route.to_string()];
    }
    vec!["*".to_string()]
}

pub fn merge_shallow(maps: Vec<(Uuid, JsonValue)>) -> JsonValue {
    let mut ordered = maps;
    ordered.sort_by_key(|(id, _)| *id);
    let mut out = serde_json::Map::new();
    for (_, value) in ordered {
        if let JsonValue::Object(obj) = value {
            for (k, v) in obj {
                out.insert(k, v);
            }
        }
    }
    JsonValue::Object(out)
}

pub fn empty_object() -> JsonValue {
    json!({})
}

pub type SharedNodeHandler = Arc<dyn NodeHandler>;
pub type MemoryPatch = HashMap<String, JsonValue>;
