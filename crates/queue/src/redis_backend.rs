use crate::job::Job;
use crate::retry::RetryPolicy;
use crate::trait_def::{EnqueueOutcome, Queue, Result, RetryDecision};
use async_trait::async_trait;
use common::error::QueueError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value as JsonValue;

const RETAINED_COMPLETED: isize = 1000;
const RETAINED_FAILED: isize = 5000;

fn pending_key(queue: &str) -> String {
    format!("queue:{queue}:pending")
}
fn processing_key(queue: &str) -> String {
    format!("queue:{queue}:processing")
}
fn delayed_key(queue: &str) -> String {
    format!("queue:{queue}:delayed")
}
fn ids_key(queue: &str) -> String {
    format!("queue:{queue}:ids")
}
fn completed_key(queue: &str) -> String {
    format!("queue:{queue}:completed")
}
fn failed_key(queue: &str) -> String {
    format!("queue:{queue}:failed")
}

/// Redis-backed `Queue`: `LPUSH`/`BRPOPLPUSH` move a job from the pending
/// list into a per-consumer processing list for at-least-once handoff; a
/// capped `SET` (`SADD`/`SREM`) deduplicates by job id; a `ZSET` holds jobs
/// awaiting their backoff delay before promotion back onto `pending`.
pub struct RedisQueue {
    conn: ConnectionManager,
    policy: RetryPolicy,
}

impl RedisQueue {
    pub async fn connect(host: &str, port: u16, policy: RetryPolicy) -> Result<Self> {
        let url = format!("redis://{host}:{port}");
        let client = redis::Client::open(url).map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        Ok(Self { conn, policy })
    }

    /// Moves any delayed jobs whose backoff has elapsed back onto `pending`.
    async fn promote_ready_delayed(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = chrono::Utc::now().timestamp_millis();
        let ready: Vec<String> = conn
            .zrangebyscore(delayed_key(queue), 0, now)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        for job_json in ready {
            let _: i64 = conn
                .zrem(delayed_key(queue), &job_json)
                .await
                .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
            let _: i64 = conn
                .lpush(pending_key(queue), &job_json)
                .await
                .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn enqueue(&self, queue: &str, job_id: &str, payload: JsonValue) -> Result<EnqueueOutcome> {
        let mut conn = self.conn.clone();
        let added: i64 = conn
            .sadd(ids_key(queue), job_id)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        if added == 0 {
            return Ok(EnqueueOutcome::DuplicateSuppressed);
        }
        let job = Job {
            id: job_id.to_string(),
            queue: queue.to_string(),
            payload,
            attempt: 1,
        };
        let job_json = serde_json::to_string(&job).map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        let _: i64 = conn
            .lpush(pending_key(queue), job_json)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Job>> {
        self.promote_ready_delayed(queue).await?;
        let mut conn = self.conn.clone();
        let job_json: Option<String> = conn
            .brpoplpush(pending_key(queue), processing_key(queue), 1.0)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        match job_json {
            None => Ok(None),
            Some(raw) => {
                let job: Job = serde_json::from_str(&raw)
                    .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
                Ok(Some(job))
            }
        }
    }

    async fn ack_completed(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let job_json =
            serde_json::to_string(job).map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        let _: i64 = conn
            .lrem(processing_key(&job.queue), 1, &job_json)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        let _: i64 = conn
            .lpush(completed_key(&job.queue), &job.id)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        let _: () = conn
            .ltrim(completed_key(&job.queue), 0, RETAINED_COMPLETED - 1)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn ack_failed(&self, job: Job, error: String) -> Result<RetryDecision> {
        let _ = error;
        let mut conn = self.conn.clone();
        let old_json =
            serde_json::to_string(&job).map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        let _: i64 = conn
            .lrem(processing_key(&job.queue), 1, &old_json)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;

        if self.policy.should_retry(job.attempt) {
            let next_attempt = job.attempt + 1;
            let delay = self.policy.calculate_delay(job.attempt);
            let not_before = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
            let next_job = Job { attempt: next_attempt, ..job };
            let next_json = serde_json::to_string(&next_job)
                .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
            let _: i64 = conn
                .zadd(delayed_key(&next_job.queue), next_json, not_before)
                .await
                .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
            Ok(RetryDecision::Retried { next_attempt })
        } else {
            let _: i64 = conn
                .lpush(failed_key(&job.queue), &job.id)
                .await
                .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
            let _: () = conn
                .ltrim(failed_key(&job.queue), 0, RETAINED_FAILED - 1)
                .await
                .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
            Ok(RetryDecision::Exhausted)
        }
    }
}
