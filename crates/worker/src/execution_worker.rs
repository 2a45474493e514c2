use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use common::clock::Clock;
use common::config::ExecutionDefaults;
use common::error::{sanitize, PlatformError};
use common::types::ExecutionStatus;
use persistence::PersistenceGateway;
use queue::{ExecuteWorkflowPayload, Job, Queue};
use workflow_engine::{NodeRegistry, WorkflowScheduler, WorkflowValidator};

/// Consumes `workflow-execution` jobs and drives them through the DAG
/// scheduler (§4.8). Runs one instance per worker process; several can share
/// a queue for horizontal consumer concurrency.
pub struct ExecutionWorker {
    gateway: Arc<dyn PersistenceGateway>,
    queue: Arc<dyn Queue>,
    scheduler: Arc<WorkflowScheduler>,
    validator: WorkflowValidator,
    registry: Arc<NodeRegistry>,
    defaults: ExecutionDefaults,
    clock: Arc<dyn Clock>,
}

impl ExecutionWorker {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        queue: Arc<dyn Queue>,
        scheduler: Arc<WorkflowScheduler>,
        registry: Arc<NodeRegistry>,
        defaults: ExecutionDefaults,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { gateway, queue, scheduler, validator: WorkflowValidator::new(), registry, defaults, clock }
    }

    /// Runs forever, polling `queue_name`. Idle ticks back off briefly so an
    /// empty queue doesn't spin the consumer.
    pub async fn run(&self, queue_name: &str) {
        loop {
            match self.queue.dequeue(queue_name).await {
                Ok(Some(job)) => self.handle(job).await,
                Ok(None) => tokio::time::sleep(Duration::from_millis(200)).await,
                Err(e) => {
                    tracing::error!(error = %e, "dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle(&self, job: Job) {
        match self.process(&job).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack_completed(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "ack_completed failed");
                }
            }
            Err(e) => {
                let message = sanitize(&e.to_string());
                tracing::warn!(job_id = %job.id, error = %message, "execution job failed, requeuing per retry policy");
                if let Err(e) = self.queue.ack_failed(job, message).await {
                    tracing::error!(error = %e, "ack_failed failed");
                }
            }
        }
    }

    /// `Ok(())` covers both a successful run and a permanent validation
    /// failure (the execution is marked `failed`, but the job itself must
    /// not be retried). `Err` is reserved for operational failures the
    /// queue's retry policy should react to.
    async fn process(&self, job: &Job) -> Result<(), PlatformError> {
        let payload: ExecuteWorkflowPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| PlatformError::Validation(format!("malformed execute-workflow payload: {e}")))?;

        let workflow = match self.gateway.get_workflow(payload.workflow_id).await {
            Ok(w) => w,
            Err(_) => {
                return self.fail_execution(payload.execution_id, "workflow not found".to_string()).await;
            }
        };
        if workflow.status != common::types::WorkflowStatus::Active {
            return self.fail_execution(payload.execution_id, "workflow is not active".to_string()).await;
        }

        if let Err(e) = self.validator.validate(&workflow, &self.registry) {
            return self.fail_execution(payload.execution_id, sanitize(&e.to_string())).await;
        }

        self.gateway
            .update_execution_status(payload.execution_id, ExecutionStatus::Running, Some(self.clock.now()), None, None)
            .await
            .map_err(PlatformError::Persistence)?;

        let result = self
            .scheduler
            .run(&workflow, payload.execution_id, payload.user_id, payload.trigger_payload, &self.defaults, self.clock.as_ref())
            .await?;

        self.gateway
            .update_execution_status(
                payload.execution_id,
                result.status,
                None,
                Some(self.clock.now()),
                result.error_message,
            )
            .await
            .map_err(PlatformError::Persistence)?;

        Ok(())
    }

    async fn fail_execution(&self, execution_id: Uuid, reason: String) -> Result<(), PlatformError> {
        self.gateway
            .update_execution_status(execution_id, ExecutionStatus::Failed, None, Some(self.clock.now()), Some(reason))
            .await
            .map_err(PlatformError::Persistence)?;
        Ok(())
    }
}
