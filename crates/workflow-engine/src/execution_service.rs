use std::sync::Arc;

use common::error::PlatformError;
use common::types::{
    Execution, ExecutionContextSnapshot, ExecutionRetrievalEvent, ExecutionStep, ExecutionStepAttempt, JsonValue,
    Page, Pagination,
};
use persistence::PersistenceGateway;
use queue::{ExecuteWorkflowPayload, Queue, QUEUE_WORKFLOW_EXECUTION};
use uuid::Uuid;

pub struct TriggerResult {
    pub execution_id: Uuid,
}

/// The library surface a thin HTTP gateway (out of this repository's scope)
/// would call into for triggering and inspecting executions — no router
/// attached, mirroring `knowledge_service::KnowledgeService`.
pub struct ExecutionService {
    gateway: Arc<dyn PersistenceGateway>,
    queue: Arc<dyn Queue>,
}

impl ExecutionService {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, queue: Arc<dyn Queue>) -> Self {
        Self { gateway, queue }
    }

    /// Creates a pending execution row and enqueues it for the worker pool
    /// to pick up (§4.8). The execution id assigned by the gateway becomes
    /// the queue job id, so re-triggering an execution that is still queued
    /// is naturally deduped by `Queue::enqueue` (§4.7).
    pub async fn trigger(
        &self,
        user_id: Uuid,
        workflow_id: Uuid,
        trigger_payload: JsonValue,
    ) -> Result<TriggerResult, PlatformError> {
        let execution = self
            .gateway
            .create_execution(workflow_id, trigger_payload.clone())
            .await?;

        let payload = ExecuteWorkflowPayload {
            execution_id: execution.id,
            workflow_id,
            trigger_payload,
            user_id,
        };
        self.queue
            .enqueue(QUEUE_WORKFLOW_EXECUTION, &payload.job_id(), serde_json::to_value(&payload).unwrap())
            .await?;

        Ok(TriggerResult { execution_id: execution.id })
    }

    pub async fn get_by_id(&self, execution_id: Uuid) -> Result<Execution, PlatformError> {
        Ok(self.gateway.get_execution(execution_id).await?)
    }

    pub async fn list_by_workflow(
        &self,
        workflow_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<Execution>, PlatformError> {
        Ok(self.gateway.list_executions_by_workflow(workflow_id, pagination).await?)
    }

    pub async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStep>, PlatformError> {
        Ok(self.gateway.list_steps(execution_id).await?)
    }

    pub async fn list_step_attempts(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionStepAttempt>, PlatformError> {
        Ok(self.gateway.list_attempts(execution_id, pagination).await?)
    }

    pub async fn list_retrieval_events(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionRetrievalEvent>, PlatformError> {
        Ok(self.gateway.list_retrieval_events(execution_id, pagination).await?)
    }

    pub async fn list_context_snapshots(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionContextSnapshot>, PlatformError> {
        Ok(self.gateway.list_snapshots(execution_id, pagination).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{ExecutionStatus, Workflow, WorkflowStatus};
    use persistence::InMemoryGateway;
    use queue::InMemoryQueue;
    use serde_json::json;

    fn service() -> (ExecutionService, Arc<InMemoryGateway>) {
        let gateway = Arc::new(InMemoryGateway::new());
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
        (ExecutionService::new(gateway.clone(), queue), gateway)
    }

    fn seed_workflow(gateway: &InMemoryGateway) -> Uuid {
        let id = Uuid::new_v4();
        gateway.seed_workflow(Workflow {
            id,
            user_id: Uuid::new_v4(),
            name: "wf".to_string(),
            description: None,
            status: WorkflowStatus::Active,
            nodes: vec![],
            edges: vec![],
            version: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        });
        id
    }

    #[tokio::test]
    async fn trigger_creates_pending_execution_and_enqueues() {
        let (service, gateway) = service();
        let workflow_id = seed_workflow(&gateway);
        let result = service.trigger(Uuid::new_v4(), workflow_id, json!({"a": 1})).await.unwrap();

        let execution = service.get_by_id(result.execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(execution.workflow_id, workflow_id);
    }

    #[tokio::test]
    async fn list_by_workflow_paginates_triggered_executions() {
        let (service, gateway) = service();
        let workflow_id = seed_workflow(&gateway);
        for _ in 0..3 {
            service.trigger(Uuid::new_v4(), workflow_id, json!({})).await.unwrap();
        }
        let page = service
            .list_by_workflow(workflow_id, Pagination { page: 1, limit: 2 })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 3);
    }
}
