use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use ai_service::{AIClient, GenerateOptions, GenerateResponse, LLMProvider, ModelProvider};
use common::error::sanitize;
use common::secrets::SecretStore;
use common::types::{
    AttemptStatus, CorpusScopeType, ExecutionRetrievalEvent, ExecutionStepAttempt, JsonValue,
    RetrievalEventStatus, RetrievalState, WorkflowNode,
};
use knowledge_service::{IngestionOutcome, KnowledgeService, QueryRequest, ScoredChunk};

use crate::context::ContextPatch;
use crate::node_api::{
    config_bool, config_u32, derive_route_tokens, NodeContext, NodeExecutionError, NodeInput,
    RetrievalAttemptRecord,
};
use crate::registry::NodeRegistry;

/// Concrete `NodeContext` the runner hands to a single `execute` attempt.
/// Built fresh per attempt: memory/knowledge are an immutable snapshot taken
/// before the node runs (single-writer per §4.3), and mutations accumulate in
/// `patch`/`retrieval_events` for the runner to harvest once `execute` returns.
struct LiveContext {
    execution_id: Uuid,
    workflow_id: Uuid,
    node_id: Uuid,
    node_type: String,
    user_id: Uuid,
    memory: HashMap<String, JsonValue>,
    knowledge: HashMap<String, JsonValue>,
    retrieval_budget: RetrievalState,
    secrets: Arc<dyn SecretStore>,
    knowledge_service: Arc<KnowledgeService>,
    patch: Mutex<ContextPatch>,
    retrieval_events: Mutex<Vec<RetrievalAttemptRecord>>,
}

#[async_trait]
impl NodeContext for LiveContext {
    fn execution_id(&self) -> Uuid {
        self.execution_id
    }
    fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }
    fn node_id(&self) -> Uuid {
        self.node_id
    }
    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn get_api_key(&self, provider: &str) -> Result<String, NodeExecutionError> {
        self.secrets
            .get_key(self.user_id, provider)
            .await
            .map_err(|e| NodeExecutionError::CapabilityMissing(e.to_string()))
    }

    async fn llm_generate(
        &self,
        provider: ModelProvider,
        model: &str,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerateResponse, NodeExecutionError> {
        let api_key = self
            .secrets
            .get_key(self.user_id, provider.as_str())
            .await
            .map_err(|e| NodeExecutionError::CapabilityMissing(format!("llm: {e}")))?;
        let client = AIClient::new().with_api_key(provider, api_key);
        client
            .generate(provider, model, prompt, options)
            .await
            .map_err(|e| NodeExecutionError::Failed(sanitize(&e.to_string())))
    }

    fn get_memory(&self, key: &str) -> Option<JsonValue> {
        self.patch
            .lock()
            .unwrap()
            .memory
            .get(key)
            .cloned()
            .or_else(|| self.memory.get(key).cloned())
    }

    fn set_memory(&self, key: &str, value: JsonValue) {
        self.patch.lock().unwrap().memory.insert(key.to_string(), value);
    }

    fn get_knowledge(&self, key: &str) -> Option<JsonValue> {
        self.knowledge.get(key).cloned()
    }

    fn retrieval_budget(&self) -> RetrievalState {
        let patch = self.patch.lock().unwrap();
        RetrievalState {
            total_requests: self.retrieval_budget.total_requests + patch.retrieval_requests_delta,
            total_successes: self.retrieval_budget.total_successes + patch.retrieval_successes_delta,
            total_empties: self.retrieval_budget.total_empties + patch.retrieval_empties_delta,
            total_failures: self.retrieval_budget.total_failures + patch.retrieval_failures_delta,
            total_duration_ms: self.retrieval_budget.total_duration_ms + patch.retrieval_duration_ms_delta,
            max_requests: self.retrieval_budget.max_requests,
            max_failures: self.retrieval_budget.max_failures,
            max_duration_ms: self.retrieval_budget.max_duration_ms,
        }
    }

    fn update_execution_context(&self, patch: ContextPatch) {
        self.patch.lock().unwrap().merge(patch);
    }

    async fn ingest_knowledge(
        &self,
        corpus_id: Uuid,
        user_id: Uuid,
        title: String,
        content_text: String,
    ) -> Result<IngestionOutcome, NodeExecutionError> {
        self.knowledge_service
            .create_and_ingest_document(
                corpus_id,
                user_id,
                common::types::DocumentSourceType::Api,
                title,
                content_text,
            )
            .await
            .map_err(|e| NodeExecutionError::Failed(sanitize(&e.to_string())))
    }

    async fn retrieve_knowledge(
        &self,
        _retriever_key: &str,
        query: &str,
        top_k: usize,
        corpus_id: Option<Uuid>,
        scope_type: Option<CorpusScopeType>,
    ) -> Result<Vec<ScoredChunk>, NodeExecutionError> {
        self.knowledge_service
            .query(QueryRequest {
                user_id: self.user_id,
                query: query.to_string(),
                top_k,
                corpus_id,
                scope_type,
                workflow_id: Some(self.workflow_id),
                execution_id: Some(self.execution_id),
            })
            .await
            .map_err(|e| NodeExecutionError::Failed(sanitize(&e.to_string())))
    }

    fn on_retrieval_event(&self, record: RetrievalAttemptRecord) {
        let mut patch = self.patch.lock().unwrap();
        patch.retrieval_requests_delta += 1;
        match record.status {
            RetrievalEventStatus::Success => patch.retrieval_successes_delta += 1,
            RetrievalEventStatus::Empty => patch.retrieval_empties_delta += 1,
            RetrievalEventStatus::Failed => patch.retrieval_failures_delta += 1,
        }
        patch.retrieval_duration_ms_delta += record.duration_ms.max(0) as u64;
        drop(patch);
        self.retrieval_events.lock().unwrap().push(record);
    }
}

/// What a single node execution (including any in-process retries) produced,
/// ready for the scheduler to turn into `ExecutionStep`/snapshot rows.
pub struct NodeRunOutcome {
    pub completed: bool,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub attempts: Vec<ExecutionStepAttempt>,
    pub patch: ContextPatch,
    pub retrieval_events: Vec<ExecutionRetrievalEvent>,
    pub route_tokens: Vec<String>,
}

fn retrieval_event_from_record(
    execution_id: Uuid,
    node_id: Uuid,
    node_type: &str,
    record: &RetrievalAttemptRecord,
) -> ExecutionRetrievalEvent {
    ExecutionRetrievalEvent {
        execution_id,
        node_id,
        node_type: node_type.to_string(),
        query: record.query.clone(),
        top_k: record.top_k,
        attempt: record.attempt,
        max_attempts: record.max_attempts,
        status: record.status,
        matches_count: record.matches_count,
        duration_ms: record.duration_ms,
        error_message: record.error_message.clone(),
        scope_type: record.scope_type.clone(),
        corpus_id: record.corpus_id,
        workflow_id_scope: None,
        execution_id_scope: None,
        strategy: Some(record.strategy.clone()),
        retriever_key: Some(record.retriever_key.clone()),
        branch_index: Some(record.branch_index),
        selected: Some(record.selected),
    }
}

fn augment_attempt_count(data: JsonValue, attempt_count: u32) -> JsonValue {
    let mut data = data;
    if let Some(obj) = data.as_object_mut() {
        obj.insert("_attempt_count".to_string(), json!(attempt_count));
        data
    } else {
        json!({"value": data, "_attempt_count": attempt_count})
    }
}

/// Drives a single node through the §4.2 retry loop and reports the
/// harvested context mutations/diagnostics back to the scheduler.
pub struct NodeRunner {
    registry: Arc<NodeRegistry>,
    secrets: Arc<dyn SecretStore>,
    knowledge_service: Arc<KnowledgeService>,
}

impl NodeRunner {
    pub fn new(
        registry: Arc<NodeRegistry>,
        secrets: Arc<dyn SecretStore>,
        knowledge_service: Arc<KnowledgeService>,
    ) -> Self {
        Self { registry, secrets, knowledge_service }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        user_id: Uuid,
        node: &WorkflowNode,
        input_data: JsonValue,
        memory: &HashMap<String, JsonValue>,
        knowledge: &HashMap<String, JsonValue>,
        retrieval_budget: RetrievalState,
    ) -> NodeRunOutcome {
        let handler = match self.registry.get(&node.node_type) {
            Some(handler) => handler.clone(),
            None => {
                return NodeRunOutcome {
                    completed: false,
                    output: None,
                    error: Some(format!("unknown node type: {}", node.node_type)),
                    duration_ms: 0,
                    attempts: vec![],
                    patch: ContextPatch::default(),
                    retrieval_events: vec![],
                    route_tokens: vec![],
                };
            }
        };

        let retry_enabled = config_bool(&node.config, "retry_enabled", false);
        let retry_max_attempts = config_u32(&node.config, "retry_max_attempts", 1).max(1);

        let mut attempts_log: Vec<ExecutionStepAttempt> = Vec::new();
        let mut combined_patch = ContextPatch::default();
        let mut combined_events: Vec<ExecutionRetrievalEvent> = Vec::new();
        let mut total_duration_ms: i64 = 0;
        let mut live_memory = memory.clone();

        let mut attempt: u32 = 1;
        loop {
            let live = LiveContext {
                execution_id,
                workflow_id,
                node_id: node.id,
                node_type: node.node_type.clone(),
                user_id,
                memory: live_memory.clone(),
                knowledge: knowledge.clone(),
                retrieval_budget,
                secrets: self.secrets.clone(),
                knowledge_service: self.knowledge_service.clone(),
                patch: Mutex::new(ContextPatch::default()),
                retrieval_events: Mutex::new(Vec::new()),
            };

            let node_input = NodeInput { data: input_data.clone(), node_config: node.config.clone() };
            let started = Instant::now();
            let result = handler.execute(&node_input, &live).await;
            let duration_ms = started.elapsed().as_millis() as i64;
            total_duration_ms += duration_ms;

            let attempt_patch = live.patch.into_inner().unwrap();
            for (k, v) in &attempt_patch.memory {
                live_memory.insert(k.clone(), v.clone());
            }
            let events: Vec<RetrievalAttemptRecord> = live.retrieval_events.into_inner().unwrap();
            combined_events.extend(
                events
                    .iter()
                    .map(|r| retrieval_event_from_record(execution_id, node.id, &node.node_type, r)),
            );
            combined_patch.merge(attempt_patch);

            match result {
                Ok(output) => {
                    let requested_retry = output.retry_requested();
                    if requested_retry && attempt < retry_max_attempts && retry_enabled {
                        attempts_log.push(ExecutionStepAttempt {
                            execution_id,
                            node_id: node.id,
                            node_type: node.node_type.clone(),
                            attempt,
                            status: AttemptStatus::Retry,
                            duration_ms,
                            reason: output.retry_reason(),
                        });
                        attempt += 1;
                        continue;
                    }

                    attempts_log.push(ExecutionStepAttempt {
                        execution_id,
                        node_id: node.id,
                        node_type: node.node_type.clone(),
                        attempt,
                        status: AttemptStatus::Completed,
                        duration_ms,
                        reason: None,
                    });

                    let route_tokens = derive_route_tokens(&output);
                    let outcome_status = if attempt > 1 {
                        "retry_succeeded_after_n"
                    } else {
                        "no_retries_needed"
                    };
                    combined_patch.memory.insert(
                        format!("retry.outcome.{}", node.id),
                        json!({"status": outcome_status}),
                    );
                    combined_patch.last_completed_node_id = Some(node.id);

                    return NodeRunOutcome {
                        completed: true,
                        output: Some(augment_attempt_count(output.data, attempt)),
                        error: None,
                        duration_ms: total_duration_ms,
                        attempts: attempts_log,
                        patch: combined_patch,
                        retrieval_events: combined_events,
                        route_tokens,
                    };
                }
                Err(err) => {
                    let sanitized = sanitize(&err.to_string());
                    attempts_log.push(ExecutionStepAttempt {
                        execution_id,
                        node_id: node.id,
                        node_type: node.node_type.clone(),
                        attempt,
                        status: AttemptStatus::Failed,
                        duration_ms,
                        reason: Some(sanitized.clone()),
                    });

                    if attempt < retry_max_attempts && retry_enabled {
                        attempt += 1;
                        continue;
                    }

                    let outcome_status = if retry_max_attempts > 1 { "retry_exhausted" } else { "no_retries_needed" };
                    combined_patch.memory.insert(
                        format!("retry.outcome.{}", node.id),
                        json!({"status": outcome_status}),
                    );

                    tracing::warn!(node_id = %node.id, node_type = %node.node_type, error = %sanitized, "node execution failed");

                    return NodeRunOutcome {
                        completed: false,
                        output: None,
                        error: Some(sanitized),
                        duration_ms: total_duration_ms,
                        attempts: attempts_log,
                        patch: combined_patch,
                        retrieval_events: combined_events,
                        route_tokens: vec![],
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::secrets::InMemorySecretStore;
    use common::types::WorkflowNode;
    use persistence::memory::InMemoryGateway;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Requests a retry on every attempt until `attempt > succeed_after`, per
    /// the §8 "retry-directive" scenarios.
    struct RetryTestNode {
        succeed_after: u32,
        attempts_seen: AtomicU32,
    }

    #[async_trait]
    impl crate::node_api::NodeHandler for RetryTestNode {
        fn node_type(&self) -> &'static str {
            "retry-test"
        }

        async fn execute(
            &self,
            _input: &NodeInput,
            _ctx: &dyn NodeContext,
        ) -> Result<crate::node_api::NodeOutput, NodeExecutionError> {
            let attempt = self.attempts_seen.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.succeed_after {
                Ok(crate::node_api::NodeOutput {
                    data: json!({"ok": false}),
                    metadata: Some(json!({"retry": {"requested": true, "reason": "retry"}})),
                })
            } else {
                Ok(crate::node_api::NodeOutput::new(json!({"ok": true})))
            }
        }
    }

    fn node(node_type: &str, config: JsonValue) -> WorkflowNode {
        WorkflowNode {
            id: Uuid::from_u128(42),
            node_type: node_type.to_string(),
            label: "n".to_string(),
            position: Default::default(),
            config,
        }
    }

    fn test_runner(handler: Arc<dyn crate::node_api::NodeHandler>) -> NodeRunner {
        let gateway = Arc::new(InMemoryGateway::new());
        NodeRunner::new(
            NodeRegistry::for_tests(vec![handler]),
            Arc::new(InMemorySecretStore::new()),
            Arc::new(KnowledgeService::new(gateway)),
        )
    }

    #[tokio::test]
    async fn retry_directive_succeeds_on_second_attempt() {
        let handler = Arc::new(RetryTestNode { succeed_after: 1, attempts_seen: AtomicU32::new(0) });
        let runner = test_runner(handler);
        let n = node("retry-test", json!({"retry_enabled": true, "retry_max_attempts": 3}));

        let outcome = runner
            .run(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), &n, json!({}), &HashMap::new(), &HashMap::new(), RetrievalState::default())
            .await;

        assert!(outcome.completed);
        assert_eq!(outcome.output.as_ref().unwrap()["_attempt_count"], json!(2));
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(
            outcome.patch.memory[&format!("retry.outcome.{}", n.id)]["status"],
            json!("retry_succeeded_after_n")
        );
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_failure() {
        let handler = Arc::new(RetryTestNode { succeed_after: u32::MAX, attempts_seen: AtomicU32::new(0) });
        let runner = test_runner(handler);
        let n = node("retry-test", json!({"retry_enabled": true, "retry_max_attempts": 2}));

        let outcome = runner
            .run(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), &n, json!({}), &HashMap::new(), &HashMap::new(), RetrievalState::default())
            .await;

        assert!(!outcome.completed);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(
            outcome.patch.memory[&format!("retry.outcome.{}", n.id)]["status"],
            json!("retry_exhausted")
        );
    }

    #[tokio::test]
    async fn unknown_node_type_fails_without_attempts() {
        let handler = Arc::new(RetryTestNode { succeed_after: 0, attempts_seen: AtomicU32::new(0) });
        let runner = test_runner(handler);
        let n = node("not-registered", json!({}));

        let outcome = runner
            .run(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), &n, json!({}), &HashMap::new(), &HashMap::new(), RetrievalState::default())
            .await;

        assert!(!outcome.completed);
        assert!(outcome.attempts.is_empty());
    }
}
