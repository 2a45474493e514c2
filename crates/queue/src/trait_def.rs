use crate::job::Job;
use async_trait::async_trait;
use common::error::QueueError;
use serde_json::Value as JsonValue;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    DuplicateSuppressed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retried { next_attempt: u32 },
    Exhausted,
}

/// Durable job queue. Two named queues run over the same trait
/// (`QUEUE_WORKFLOW_EXECUTION`, `QUEUE_KNOWLEDGE_INGESTION`); per-job-id
/// dedupe, retention, and retry/backoff are a queue-wide contract rather
/// than something each consumer re-implements.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, queue: &str, job_id: &str, payload: JsonValue) -> Result<EnqueueOutcome>;

    /// At-least-once dequeue: the returned job must be acked via
    /// `ack_completed`/`ack_failed` or it remains in-flight.
    async fn dequeue(&self, queue: &str) -> Result<Option<Job>>;

    async fn ack_completed(&self, job: &Job) -> Result<()>;

    /// Consults the retry policy; either requeues with an incremented
    /// attempt count or moves the job to the failed-retention list.
    async fn ack_failed(&self, job: Job, error: String) -> Result<RetryDecision>;
}
