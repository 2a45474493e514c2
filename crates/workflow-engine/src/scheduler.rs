use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use common::clock::Clock;
use common::config::ExecutionDefaults;
use common::error::PlatformError;
use common::types::{
    ExecutionContextState, ExecutionStatus, ExecutionStep, JsonValue, SnapshotReason, StepStatus,
    Workflow, WorkflowEdge,
};
use persistence::PersistenceGateway;

use crate::context::{apply_patch, merge_wave_patches};
use crate::executor::NodeRunner;
use crate::node_api::merge_shallow;
use crate::parser::WorkflowParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// Result of driving one execution through to a terminal state (§4.1).
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub steps: Vec<ExecutionStep>,
    pub total_duration_ms: i64,
    pub error_message: Option<String>,
    pub context: ExecutionContextState,
}

fn edge_condition_token(edge: &WorkflowEdge) -> Option<String> {
    edge.condition.as_ref().and_then(|v| v.as_str()).map(str::to_string)
}

fn edge_active(edge: &WorkflowEdge, source_status: RunStatus, source_tokens: &[String]) -> bool {
    if source_status != RunStatus::Completed {
        return false;
    }
    match edge_condition_token(edge) {
        None => true,
        Some(token) => source_tokens.iter().any(|t| t == &token),
    }
}

fn node_reachable(
    node_id: Uuid,
    edges: &[WorkflowEdge],
    status: &HashMap<Uuid, RunStatus>,
    tokens: &HashMap<Uuid, Vec<String>>,
) -> bool {
    let incoming: Vec<&WorkflowEdge> = edges.iter().filter(|e| e.target == node_id).collect();
    if incoming.is_empty() {
        return true;
    }
    incoming.iter().any(|edge| {
        let source_status = status.get(&edge.source).copied().unwrap_or(RunStatus::Pending);
        let source_tokens = tokens.get(&edge.source).cloned().unwrap_or_default();
        edge_active(edge, source_status, &source_tokens)
    })
}

/// Whether execution as a whole should be reported `failed` per §4.10: a
/// critical terminal node (the `output` node, or any leaf) that never
/// reached `completed`.
fn execution_failed(workflow: &Workflow, status: &HashMap<Uuid, RunStatus>) -> bool {
    if !status.values().any(|s| matches!(s, RunStatus::Failed)) {
        return false;
    }
    for node in &workflow.nodes {
        let is_leaf = !workflow.edges.iter().any(|e| e.source == node.id);
        let is_output = node.node_type == "output";
        if is_leaf || is_output {
            if !matches!(status.get(&node.id), Some(RunStatus::Completed)) {
                return true;
            }
        }
    }
    false
}

/// Drives a single execution's DAG through to completion: wave computation
/// (delegated to `WorkflowParser`), branch activation, skip propagation,
/// control-flag/cancellation handling, and snapshot emission. One instance is
/// shared across executions; all per-run state lives on the stack of `run`.
pub struct WorkflowScheduler {
    parser: WorkflowParser,
    gateway: Arc<dyn PersistenceGateway>,
    runner: Arc<NodeRunner>,
}

impl WorkflowScheduler {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, runner: Arc<NodeRunner>) -> Self {
        Self { parser: WorkflowParser::new(), gateway, runner }
    }

    pub async fn run(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
        user_id: Uuid,
        trigger_payload: JsonValue,
        defaults: &ExecutionDefaults,
        clock: &dyn Clock,
    ) -> Result<ExecutionResult, PlatformError> {
        let waves = self
            .parser
            .topological_waves(workflow)
            .map_err(PlatformError::Parse)?;

        let started_at = clock.now();
        let mut state = ExecutionContextState::new(started_at, defaults);
        let wave_json: Vec<Vec<String>> = waves
            .iter()
            .map(|wave| wave.iter().map(Uuid::to_string).collect())
            .collect();
        state.knowledge.insert("scheduler.waves".to_string(), json!(wave_json));
        state.version += 1;

        let mut sequence: u64 = 0;
        self.gateway
            .insert_snapshot(common::types::ExecutionContextSnapshot {
                execution_id,
                sequence,
                reason: SnapshotReason::Init,
                node_id: None,
                node_type: None,
                state: state.clone(),
            })
            .await
            .map_err(PlatformError::Persistence)?;
        sequence += 1;

        let mut status: HashMap<Uuid, RunStatus> = workflow.nodes.iter().map(|n| (n.id, RunStatus::Pending)).collect();
        let mut route_tokens: HashMap<Uuid, Vec<String>> = HashMap::new();
        let mut node_outputs: HashMap<Uuid, JsonValue> = HashMap::new();
        let mut steps: Vec<ExecutionStep> = Vec::new();
        let mut total_duration_ms: i64 = 0;
        let mut terminal_reason: Option<SnapshotReason> = None;

        'waves: for wave in &waves {
            let execution = self.gateway.get_execution(execution_id).await.map_err(PlatformError::Persistence)?;
            if execution.status == ExecutionStatus::Canceled {
                for node in &workflow.nodes {
                    status.entry(node.id).and_modify(|s| {
                        if *s == RunStatus::Pending {
                            *s = RunStatus::Skipped;
                        }
                    });
                }
                terminal_reason = Some(SnapshotReason::Canceled);
                break 'waves;
            }

            let mut wave_nodes: Vec<Uuid> = wave.clone();
            wave_nodes.sort();

            // Nodes within a wave have no edges between them (Kahn's algorithm
            // guarantees their dependencies all sit in earlier, already-finalized
            // waves), so reachability and input assembly can be decided up front
            // and the actual `execute` calls run concurrently via `JoinSet`.
            // Bookkeeping (snapshots, step rows, status updates) is then replayed
            // in ascending-node-id order regardless of completion order, per §4.1/§4.3.
            let mut runnable: Vec<(Uuid, JsonValue)> = Vec::new();
            for &node_id in &wave_nodes {
                let node = workflow.nodes.iter().find(|n| n.id == node_id).expect("node id from wave exists");

                if !node_reachable(node_id, &workflow.edges, &status, &route_tokens) {
                    status.insert(node_id, RunStatus::Skipped);
                    steps.push(ExecutionStep {
                        id: Uuid::new_v4(),
                        execution_id,
                        node_id,
                        node_type: node.node_type.clone(),
                        status: StepStatus::Skipped,
                        input: json!({}),
                        output: None,
                        duration_ms: Some(0),
                        error: None,
                    });
                    self.gateway.insert_step(steps.last().unwrap().clone()).await.map_err(PlatformError::Persistence)?;
                    continue;
                }

                let incoming_outputs: Vec<(Uuid, JsonValue)> = workflow
                    .edges
                    .iter()
                    .filter(|e| e.target == node_id)
                    .filter(|e| {
                        let source_status = status.get(&e.source).copied().unwrap_or(RunStatus::Pending);
                        let source_tokens = route_tokens.get(&e.source).cloned().unwrap_or_default();
                        edge_active(e, source_status, &source_tokens)
                    })
                    .filter_map(|e| node_outputs.get(&e.source).cloned().map(|v| (e.source, v)))
                    .collect();

                let input_data = if incoming_outputs.is_empty() {
                    trigger_payload.clone()
                } else {
                    merge_shallow(incoming_outputs)
                };
                runnable.push((node_id, input_data));
            }

            if runnable.is_empty() {
                continue;
            }

            let memory_snapshot = Arc::new(state.memory.clone());
            let knowledge_snapshot = Arc::new(state.knowledge.clone());
            let retrieval_budget = state.retrieval;

            let mut join_set = tokio::task::JoinSet::new();
            for (node_id, input_data) in runnable {
                let node = workflow.nodes.iter().find(|n| n.id == node_id).expect("node id from wave exists").clone();
                let runner = self.runner.clone();
                let memory_snapshot = memory_snapshot.clone();
                let knowledge_snapshot = knowledge_snapshot.clone();
                let workflow_id = workflow.id;
                join_set.spawn(async move {
                    let outcome = runner
                        .run(
                            execution_id,
                            workflow_id,
                            user_id,
                            &node,
                            input_data.clone(),
                            &memory_snapshot,
                            &knowledge_snapshot,
                            retrieval_budget,
                        )
                        .await;
                    (node, input_data, outcome)
                });
            }

            let mut wave_outcomes = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                wave_outcomes.push(joined.expect("node task panicked"));
            }
            wave_outcomes.sort_by_key(|(node, _, _)| node.id);

            let mut terminate_requested_by: Option<Uuid> = None;

            // §4.3 merges `loopCount`/`retryCount` across a wave by taking the
            // max contributed delta, not the sum — resolve that once up front
            // via `merge_wave_patches`, then strip the fields from each node's
            // own patch below so the per-node sequential apply only carries the
            // memory/knowledge/retrieval-counter mutations it already handles
            // correctly (last-writer-wins / additive, in ascending node id
            // order).
            let control_patch = {
                let pairs = wave_outcomes
                    .iter()
                    .map(|(node, _, outcome)| (node.id, outcome.patch.clone()))
                    .collect();
                let mut merged = merge_wave_patches(pairs);
                merged.memory.clear();
                merged.knowledge.clear();
                merged.terminate = None;
                merged.retrieval_requests_delta = 0;
                merged.retrieval_successes_delta = 0;
                merged.retrieval_empties_delta = 0;
                merged.retrieval_failures_delta = 0;
                merged.retrieval_duration_ms_delta = 0;
                merged.active_node_id = None;
                merged.last_completed_node_id = None;
                merged
            };

            for (node, input_data, mut outcome) in wave_outcomes {
                let node_id = node.id;
                total_duration_ms += outcome.duration_ms;

                for attempt in &outcome.attempts {
                    self.gateway.insert_attempt(attempt.clone()).await.map_err(PlatformError::Persistence)?;
                }
                for event in &outcome.retrieval_events {
                    self.gateway.insert_retrieval_event(event.clone()).await.map_err(PlatformError::Persistence)?;
                }

                outcome.patch.loop_count_delta = None;
                outcome.patch.retry_count_delta = None;
                apply_patch(&mut state, outcome.patch);
                state.runtime.active_node_id = Some(node_id);
                state.runtime.updated_at = clock.now();

                self.gateway
                    .insert_snapshot(common::types::ExecutionContextSnapshot {
                        execution_id,
                        sequence,
                        reason: SnapshotReason::Step,
                        node_id: Some(node_id),
                        node_type: Some(node.node_type.clone()),
                        state: state.clone(),
                    })
                    .await
                    .map_err(PlatformError::Persistence)?;
                sequence += 1;

                let step = ExecutionStep {
                    id: Uuid::new_v4(),
                    execution_id,
                    node_id,
                    node_type: node.node_type.clone(),
                    status: if outcome.completed { StepStatus::Completed } else { StepStatus::Failed },
                    input: input_data,
                    output: outcome.output.clone(),
                    duration_ms: Some(outcome.duration_ms),
                    error: outcome.error.clone(),
                };
                self.gateway.insert_step(step.clone()).await.map_err(PlatformError::Persistence)?;
                steps.push(step);

                if outcome.completed {
                    status.insert(node_id, RunStatus::Completed);
                    if let Some(output) = outcome.output {
                        node_outputs.insert(node_id, output);
                    }
                    route_tokens.insert(node_id, outcome.route_tokens);
                } else {
                    status.insert(node_id, RunStatus::Failed);
                }

                if state.control.terminate && terminate_requested_by.is_none() {
                    terminate_requested_by = Some(node_id);
                }
            }

            apply_patch(&mut state, control_patch);

            if let Some(node_id) = terminate_requested_by {
                for n in &workflow.nodes {
                    status.entry(n.id).and_modify(|s| {
                        if *s == RunStatus::Pending {
                            *s = RunStatus::Skipped;
                        }
                    });
                }
                state.memory.insert(
                    "execution.outcome".to_string(),
                    json!({"status": "terminated_by_control", "reason": format!("node {} requested termination", node_id)}),
                );
                break 'waves;
            }
        }

        let failed = execution_failed(workflow, &status);
        let final_status = match terminal_reason {
            Some(SnapshotReason::Canceled) => ExecutionStatus::Canceled,
            _ if failed => ExecutionStatus::Failed,
            _ => ExecutionStatus::Completed,
        };
        let snapshot_reason = match final_status {
            ExecutionStatus::Canceled => SnapshotReason::Canceled,
            ExecutionStatus::Failed => SnapshotReason::Error,
            _ => SnapshotReason::Final,
        };

        state.runtime.updated_at = clock.now();
        self.gateway
            .insert_snapshot(common::types::ExecutionContextSnapshot {
                execution_id,
                sequence,
                reason: snapshot_reason,
                node_id: None,
                node_type: None,
                state: state.clone(),
            })
            .await
            .map_err(PlatformError::Persistence)?;

        let error_message = steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Failed)
            .and_then(|s| s.error.clone());

        Ok(ExecutionResult {
            status: final_status,
            steps,
            total_duration_ms,
            error_message: if final_status == ExecutionStatus::Failed { error_message } else { None },
            context: state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::clock::SystemClock;
    use common::secrets::InMemorySecretStore;
    use common::types::{Position, WorkflowNode, WorkflowStatus};
    use crate::registry::NodeRegistry;
    use knowledge_service::KnowledgeService;
    use persistence::memory::InMemoryGateway;

    fn node(id: Uuid, node_type: &str, config: JsonValue) -> WorkflowNode {
        WorkflowNode { id, node_type: node_type.to_string(), label: "n".to_string(), position: Position::default(), config }
    }

    fn edge(source: Uuid, target: Uuid, condition: Option<&str>) -> WorkflowEdge {
        WorkflowEdge { id: Uuid::new_v4(), source, target, condition: condition.map(|c| json!(c)) }
    }

    async fn scheduler_with(gateway: Arc<InMemoryGateway>) -> WorkflowScheduler {
        let registry = NodeRegistry::builtin();
        let runner = Arc::new(NodeRunner::new(
            registry,
            Arc::new(InMemorySecretStore::new()),
            Arc::new(KnowledgeService::new(gateway.clone())),
        ));
        WorkflowScheduler::new(gateway, runner)
    }

    #[tokio::test]
    async fn control_terminate_skips_downstream_nodes() {
        let gateway = Arc::new(InMemoryGateway::new());
        let scheduler = scheduler_with(gateway.clone()).await;

        let t = Uuid::from_u128(1);
        let d = Uuid::from_u128(2);
        let wf = Workflow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "terminate".to_string(),
            description: None,
            status: WorkflowStatus::Active,
            nodes: vec![
                node(t, "execution-control", json!({"action": "terminate"})),
                node(d, "log", json!({"message": "unreachable"})),
            ],
            edges: vec![edge(t, d, None)],
            version: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let execution = gateway.create_execution(wf.id, json!({})).await.unwrap();
        let result = scheduler
            .run(&wf, execution.id, Uuid::new_v4(), json!({}), &common::config::ExecutionDefaults::default(), &SystemClock)
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(
            result.context.memory["execution.outcome"]["status"],
            json!("terminated_by_control")
        );
        let d_step = result.steps.iter().find(|s| s.node_id == d).unwrap();
        assert_eq!(d_step.status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn edge_condition_routes_to_matching_branch_only() {
        let gateway = Arc::new(InMemoryGateway::new());
        let scheduler = scheduler_with(gateway.clone()).await;

        let c = Uuid::from_u128(1);
        let yes = Uuid::from_u128(2);
        let no = Uuid::from_u128(3);
        let wf = Workflow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "branching".to_string(),
            description: None,
            status: WorkflowStatus::Active,
            nodes: vec![
                node(c, "condition", json!({"field": "status", "operator": "equals", "value": "ready"})),
                node(yes, "log", json!({"message": "yes branch"})),
                node(no, "log", json!({"message": "no branch"})),
            ],
            edges: vec![edge(c, yes, Some("true")), edge(c, no, Some("false"))],
            version: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let execution = gateway.create_execution(wf.id, json!({"status": "ready"})).await.unwrap();
        let result = scheduler
            .run(&wf, execution.id, Uuid::new_v4(), json!({"status": "ready"}), &common::config::ExecutionDefaults::default(), &SystemClock)
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        let yes_step = result.steps.iter().find(|s| s.node_id == yes).unwrap();
        let no_step = result.steps.iter().find(|s| s.node_id == no).unwrap();
        assert_eq!(yes_step.status, StepStatus::Completed);
        assert_eq!(no_step.status, StepStatus::Skipped);
    }
}
