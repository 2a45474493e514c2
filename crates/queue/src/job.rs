use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const QUEUE_WORKFLOW_EXECUTION: &str = "workflow-execution";
pub const QUEUE_KNOWLEDGE_INGESTION: &str = "knowledge-ingestion";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteWorkflowPayload {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_payload: JsonValue,
    pub user_id: Uuid,
}

impl ExecuteWorkflowPayload {
    pub fn job_id(&self) -> String {
        self.execution_id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestKnowledgeDocumentPayload {
    pub corpus_id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
}

impl IngestKnowledgeDocumentPayload {
    pub fn job_id(&self) -> String {
        format!("ingest-{}", self.document_id)
    }
}

/// A dequeued unit of work. `attempt` is 1 on first delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub payload: JsonValue,
    pub attempt: u32,
}
