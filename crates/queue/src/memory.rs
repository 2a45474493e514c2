use crate::job::Job;
use crate::retry::RetryPolicy;
use crate::trait_def::{EnqueueOutcome, Queue, Result, RetryDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::clock::{Clock, SystemClock};
use common::error::QueueError;
use serde_json::Value as JsonValue;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

const RETAINED_COMPLETED: usize = 1000;
const RETAINED_FAILED: usize = 5000;

struct PendingEntry {
    job: Job,
    not_before: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingEntry>,
    in_flight: std::collections::HashMap<String, Job>,
    known_ids: HashSet<String>,
    completed: VecDeque<String>,
    failed: VecDeque<String>,
}

/// `VecDeque`-backed `Queue` behind the same trait the Redis transport
/// implements; used by unit tests, property tests, and the in-process
/// worker tests in §8.
pub struct InMemoryQueue {
    state: Mutex<std::collections::HashMap<String, QueueState>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(std::collections::HashMap::new()),
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(std::collections::HashMap::new()),
            policy,
            clock,
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, queue: &str, job_id: &str, payload: JsonValue) -> Result<EnqueueOutcome> {
        let mut states = self.state.lock().unwrap();
        let state = states.entry(queue.to_string()).or_default();
        if state.known_ids.contains(job_id) {
            return Ok(EnqueueOutcome::DuplicateSuppressed);
        }
        state.known_ids.insert(job_id.to_string());
        state.pending.push_back(PendingEntry {
            job: Job {
                id: job_id.to_string(),
                queue: queue.to_string(),
                payload,
                attempt: 1,
            },
            not_before: self.clock.now(),
        });
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Job>> {
        let mut states = self.state.lock().unwrap();
        let state = states.entry(queue.to_string()).or_default();
        let now = self.clock.now();
        let ready_index = state.pending.iter().position(|e| e.not_before <= now);
        let Some(index) = ready_index else { return Ok(None) };
        let entry = state.pending.remove(index).unwrap();
        state.in_flight.insert(entry.job.id.clone(), entry.job.clone());
        Ok(Some(entry.job))
    }

    async fn ack_completed(&self, job: &Job) -> Result<()> {
        let mut states = self.state.lock().unwrap();
        let state = states
            .get_mut(&job.queue)
            .ok_or_else(|| QueueError::JobNotFound(job.id.clone()))?;
        state.in_flight.remove(&job.id);
        state.completed.push_back(job.id.clone());
        while state.completed.len() > RETAINED_COMPLETED {
            if let Some(old) = state.completed.pop_front() {
                state.known_ids.remove(&old);
            }
        }
        Ok(())
    }

    async fn ack_failed(&self, job: Job, error: String) -> Result<RetryDecision> {
        let _ = error;
        let mut states = self.state.lock().unwrap();
        let state = states
            .entry(job.queue.clone())
            .or_default();
        state.in_flight.remove(&job.id);

        if self.policy.should_retry(job.attempt) {
            let next_attempt = job.attempt + 1;
            let delay = self.policy.calculate_delay(job.attempt);
            let not_before = self.clock.now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            state.pending.push_back(PendingEntry {
                job: Job { attempt: next_attempt, ..job },
                not_before,
            });
            Ok(RetryDecision::Retried { next_attempt })
        } else {
            state.failed.push_back(job.id.clone());
            while state.failed.len() > RETAINED_FAILED {
                if let Some(old) = state.failed.pop_front() {
                    state.known_ids.remove(&old);
                }
            }
            Ok(RetryDecision::Exhausted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::QUEUE_WORKFLOW_EXECUTION;
    use proptest::prelude::*;

    #[tokio::test]
    async fn duplicate_job_id_is_suppressed() {
        let queue = InMemoryQueue::new();
        let first = queue
            .enqueue(QUEUE_WORKFLOW_EXECUTION, "exec-1", serde_json::json!({}))
            .await
            .unwrap();
        let second = queue
            .enqueue(QUEUE_WORKFLOW_EXECUTION, "exec-1", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(first, EnqueueOutcome::Enqueued);
        assert_eq!(second, EnqueueOutcome::DuplicateSuppressed);

        let mut consumed = 0;
        while queue.dequeue(QUEUE_WORKFLOW_EXECUTION).await.unwrap().is_some() {
            consumed += 1;
        }
        assert_eq!(consumed, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_reach_failed_retention() {
        let queue = InMemoryQueue::with_policy(RetryPolicy {
            max_attempts: 2,
            initial_delay: std::time::Duration::from_millis(0),
            max_delay: std::time::Duration::from_millis(0),
            backoff_multiplier: 1.0,
        });
        queue
            .enqueue(QUEUE_WORKFLOW_EXECUTION, "exec-2", serde_json::json!({}))
            .await
            .unwrap();

        let job = queue.dequeue(QUEUE_WORKFLOW_EXECUTION).await.unwrap().unwrap();
        let decision = queue.ack_failed(job, "boom".to_string()).await.unwrap();
        assert_eq!(decision, RetryDecision::Retried { next_attempt: 2 });

        let job = queue.dequeue(QUEUE_WORKFLOW_EXECUTION).await.unwrap().unwrap();
        assert_eq!(job.attempt, 2);
        let decision = queue.ack_failed(job, "boom again".to_string()).await.unwrap();
        assert_eq!(decision, RetryDecision::Exhausted);

        assert!(queue.dequeue(QUEUE_WORKFLOW_EXECUTION).await.unwrap().is_none());
    }

    proptest! {
        // §8 "Queue dedupe": two (or more) enqueues with identical job_id
        // within retention produce exactly one consumption, for any job id
        // and any number of repeat enqueues.
        #[test]
        fn duplicate_enqueue_is_always_suppressed_for_arbitrary_ids(
            job_id in "[a-z]{1,12}",
            enqueue_count in 2usize..6,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (enqueued, consumed) = rt.block_on(async {
                let queue = InMemoryQueue::new();
                let mut enqueued = 0;
                for _ in 0..enqueue_count {
                    let outcome = queue
                        .enqueue(QUEUE_WORKFLOW_EXECUTION, &job_id, serde_json::json!({}))
                        .await
                        .unwrap();
                    if outcome == EnqueueOutcome::Enqueued {
                        enqueued += 1;
                    }
                }
                let mut consumed = 0;
                while queue.dequeue(QUEUE_WORKFLOW_EXECUTION).await.unwrap().is_some() {
                    consumed += 1;
                }
                (enqueued, consumed)
            });
            prop_assert_eq!(enqueued, 1);
            prop_assert_eq!(consumed, 1);
        }
    }
}
