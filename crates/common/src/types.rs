use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Basic types
pub type JsonValue = serde_json::Value;

// ---------------------------------------------------------------------
// Workflow definition
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Active,
    Inactive,
}

/// A single node in a workflow graph. `node_type` is a registry key (e.g.
/// "llm", "http-request") rather than a closed Rust enum, matching the
/// schemaless config the visual editor persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: Uuid,
    pub node_type: String,
    pub label: String,
    pub position: Position,
    pub config: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// `condition` is an activation token matched against the source node's
/// emitted route tokens. `None` means unconditional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: Uuid,
    pub source: Uuid,
    pub target: Uuid,
    pub condition: Option<JsonValue>,
}

// ---------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub trigger_payload: JsonValue,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: Uuid,
    pub node_type: String,
    pub status: StepStatus,
    pub input: JsonValue,
    pub output: Option<JsonValue>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Completed,
    Retry,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStepAttempt {
    pub execution_id: Uuid,
    pub node_id: Uuid,
    pub node_type: String,
    pub attempt: u32,
    pub status: AttemptStatus,
    pub duration_ms: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotReason {
    Init,
    Step,
    Final,
    Error,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContextSnapshot {
    pub execution_id: Uuid,
    pub sequence: u64,
    pub reason: SnapshotReason,
    pub node_id: Option<Uuid>,
    pub node_type: Option<String>,
    pub state: ExecutionContextState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalEventStatus {
    Success,
    Empty,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRetrievalEvent {
    pub execution_id: Uuid,
    pub node_id: Uuid,
    pub node_type: String,
    pub query: String,
    pub top_k: u32,
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: RetrievalEventStatus,
    pub matches_count: u32,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub scope_type: Option<String>,
    pub corpus_id: Option<Uuid>,
    pub workflow_id_scope: Option<Uuid>,
    pub execution_id_scope: Option<Uuid>,
    pub strategy: Option<String>,
    pub retriever_key: Option<String>,
    pub branch_index: Option<u32>,
    pub selected: Option<bool>,
}

// ---------------------------------------------------------------------
// Execution context state (v1)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContextState {
    pub version: u64,
    pub memory: HashMap<String, JsonValue>,
    pub knowledge: HashMap<String, JsonValue>,
    pub control: ControlState,
    pub retrieval: RetrievalState,
    pub runtime: RuntimeState,
}

impl ExecutionContextState {
    pub fn new(started_at: DateTime<Utc>, defaults: &crate::config::ExecutionDefaults) -> Self {
        Self {
            version: 0,
            memory: HashMap::new(),
            knowledge: HashMap::new(),
            control: ControlState {
                loop_count: 0,
                retry_count: 0,
                max_loops: defaults.max_loops,
                max_retries: defaults.max_retries,
                terminate: false,
            },
            retrieval: RetrievalState {
                total_requests: 0,
                total_successes: 0,
                total_empties: 0,
                total_failures: 0,
                total_duration_ms: 0,
                max_requests: defaults.max_retrieval_requests,
                max_failures: defaults.max_retrieval_failures,
                max_duration_ms: defaults.max_retrieval_duration_ms,
            },
            runtime: RuntimeState {
                started_at,
                updated_at: started_at,
                active_node_id: None,
                last_completed_node_id: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlState {
    pub loop_count: u32,
    pub retry_count: u32,
    pub max_loops: u32,
    pub max_retries: u32,
    pub terminate: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RetrievalState {
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_empties: u64,
    pub total_failures: u64,
    pub total_duration_ms: u64,
    pub max_requests: u64,
    pub max_failures: u64,
    pub max_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active_node_id: Option<Uuid>,
    pub last_completed_node_id: Option<Uuid>,
}

// ---------------------------------------------------------------------
// Knowledge subsystem
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CorpusScopeType {
    User,
    Workflow,
    Execution,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CorpusStatus {
    Ingesting,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeCorpus {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub scope_type: CorpusScopeType,
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub status: CorpusStatus,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSourceType {
    Upload,
    Inline,
    Api,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: Uuid,
    pub corpus_id: Uuid,
    pub user_id: Uuid,
    pub source_type: DocumentSourceType,
    pub title: String,
    pub mime_type: Option<String>,
    pub content_text: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: Uuid,
    pub corpus_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub content: String,
    pub token_count: Option<u32>,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 50 }
    }
}

impl Pagination {
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, 200),
        }
    }

    pub fn offset(&self) -> i64 {
        let n = self.normalized();
        ((n.page - 1) * n.limit) as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}
