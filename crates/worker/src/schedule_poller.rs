use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::interval;
use uuid::Uuid;

use common::clock::Clock;
use common::types::{JsonValue, WorkflowStatus};
use persistence::PersistenceGateway;
use queue::{ExecuteWorkflowPayload, Queue, QUEUE_WORKFLOW_EXECUTION};
use workflow_engine::nodes::triggers::approximate_cron_interval;

/// Periodically scans active workflows for `schedule-trigger` nodes and
/// enqueues an execution once each one's effective interval has elapsed
/// (§4.9). One `last_run_at` map is kept in-process per poller instance —
/// restarting the worker process resets it, which is an accepted gap noted
/// in DESIGN.md rather than a persisted cursor.
pub struct SchedulePoller {
    gateway: Arc<dyn PersistenceGateway>,
    queue: Arc<dyn Queue>,
    clock: Arc<dyn Clock>,
    last_run: Arc<RwLock<HashMap<Uuid, DateTime<Utc>>>>,
    poll_interval: Duration,
}

impl SchedulePoller {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, queue: Arc<dyn Queue>, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self { gateway, queue, clock, last_run: Arc::new(RwLock::new(HashMap::new())), poll_interval }
    }

    /// Spawns the polling loop and returns immediately; the returned handle
    /// can be awaited or aborted by the caller.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.poll_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "schedule poll tick failed");
                }
            }
        })
    }

    async fn tick(&self) -> Result<(), common::error::PersistenceError> {
        let workflows = self.gateway.list_active_workflows().await?;
        for workflow in workflows.into_iter().filter(|w| w.status == WorkflowStatus::Active) {
            for node in &workflow.nodes {
                if node.node_type != "schedule-trigger" {
                    continue;
                }
                let Some(effective_interval) = effective_interval_secs(&node.config) else { continue };
                self.maybe_fire(workflow.id, workflow.user_id, effective_interval).await;
            }
        }
        Ok(())
    }

    async fn maybe_fire(&self, workflow_id: Uuid, user_id: Uuid, effective_interval_secs: u64) {
        let now = self.clock.now();
        let due = {
            let last_run = self.last_run.read().await;
            match last_run.get(&workflow_id) {
                Some(last) => (now - *last).num_seconds() >= effective_interval_secs as i64,
                None => true,
            }
        };
        if !due {
            return;
        }

        let execution_id = Uuid::new_v4();
        let trigger_payload: JsonValue = serde_json::json!({"_trigger": "schedule", "_scheduled_at": now.to_rfc3339()});
        let payload = ExecuteWorkflowPayload { execution_id, workflow_id, trigger_payload, user_id };

        match self.queue.enqueue(QUEUE_WORKFLOW_EXECUTION, &payload.job_id(), serde_json::to_value(&payload).unwrap()).await {
            Ok(_) => {
                self.last_run.write().await.insert(workflow_id, now);
            }
            Err(e) => {
                tracing::error!(workflow_id = %workflow_id, error = %e, "failed to enqueue scheduled execution");
            }
        }
    }
}

/// `interval_ms` takes precedence over `cron` when both are present (§4.9).
fn effective_interval_secs(config: &JsonValue) -> Option<u64> {
    if let Some(interval_ms) = config.get("interval_ms").and_then(|v| v.as_u64()) {
        return Some((interval_ms / 1000).max(1));
    }
    config.get("cron").and_then(|v| v.as_str()).map(approximate_cron_interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn interval_ms_takes_precedence_over_cron() {
        let config = json!({"interval_ms": 5000, "cron": "* * * * *"});
        assert_eq!(effective_interval_secs(&config), Some(5));
    }

    #[test]
    fn falls_back_to_cron_approximation() {
        let config = json!({"cron": "*/15 * * * *"});
        assert_eq!(effective_interval_secs(&config), Some(900));
    }

    #[test]
    fn neither_field_present_is_not_a_schedule() {
        assert_eq!(effective_interval_secs(&json!({})), None);
    }
}
