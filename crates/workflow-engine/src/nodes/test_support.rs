#![cfg(test)]
use crate::context::ContextPatch;
use crate::node_api::{NodeContext, NodeExecutionError, RetrievalAttemptRecord};
use common::types::{CorpusScopeType, JsonValue};
use std::sync::Mutex;
use uuid::Uuid;

/// A bare-bones `NodeContext` for node-level unit tests that don't need
/// secrets, LLM calls, or knowledge retrieval. Memory writes are captured so
/// tests can assert on them.
#[derive(Default)]
pub struct StubContext {
    pub memory: Mutex<std::collections::HashMap<String, JsonValue>>,
    pub patches: Mutex<Vec<ContextPatch>>,
}

impl StubContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patches(&self) -> Vec<ContextPatch> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NodeContext for StubContext {
    fn execution_id(&self) -> Uuid {
        Uuid::nil()
    }
    fn workflow_id(&self) -> Uuid {
        Uuid::nil()
    }
    fn node_id(&self) -> Uuid {
        Uuid::nil()
    }
    fn node_type(&self) -> &str {
        "stub"
    }

    async fn get_api_key(&self, _provider: &str) -> Result<String, NodeExecutionError> {
        Err(NodeExecutionError::Failed("no api keys in test stub".to_string()))
    }

    async fn llm_generate(
        &self,
        _provider: ai_service::ModelProvider,
        _model: &str,
        _prompt: &str,
        _options: ai_service::GenerateOptions,
    ) -> Result<ai_service::GenerateResponse, NodeExecutionError> {
        Err(NodeExecutionError::Failed("no llm provider in test stub".to_string()))
    }

    fn get_memory(&self, key: &str) -> Option<JsonValue> {
        self.memory.lock().unwrap().get(key).cloned()
    }

    fn set_memory(&self, key: &str, value: JsonValue) {
        self.memory.lock().unwrap().insert(key.to_string(), value);
    }

    fn get_knowledge(&self, _key: &str) -> Option<JsonValue> {
        None
    }

    fn retrieval_budget(&self) -> common::types::RetrievalState {
        common::types::RetrievalState {
            total_requests: 0,
            total_successes: 0,
            total_empties: 0,
            total_failures: 0,
            total_duration_ms: 0,
            max_requests: 50,
            max_failures: 10,
            max_duration_ms: 60_000,
        }
    }

    fn update_execution_context(&self, patch: ContextPatch) {
        self.patches.lock().unwrap().push(patch);
    }

    async fn ingest_knowledge(
        &self,
        _corpus_id: Uuid,
        _user_id: Uuid,
        _title: String,
        _content_text: String,
    ) -> Result<knowledge_service::IngestionOutcome, NodeExecutionError> {
        Err(NodeExecutionError::CapabilityMissing("ingest_knowledge".to_string()))
    }

    async fn retrieve_knowledge(
        &self,
        _retriever_key: &str,
        _query: &str,
        _top_k: usize,
        _corpus_id: Option<Uuid>,
        _scope_type: Option<CorpusScopeType>,
    ) -> Result<Vec<knowledge_service::ScoredChunk>, NodeExecutionError> {
        Err(NodeExecutionError::CapabilityMissing("retrieve_knowledge".to_string()))
    }

    fn on_retrieval_event(&self, _record: RetrievalAttemptRecord) {}
}
