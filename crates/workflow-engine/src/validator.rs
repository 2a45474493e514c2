use uuid::Uuid;

use common::error::ParseError;
use common::types::Workflow;

use crate::node_api::ValidationOutcome;
use crate::parser::WorkflowParser;
use crate::registry::NodeRegistry;

/// Runs the full §4.1 "Validation" pass: structural checks and node-type
/// registration (delegated to `WorkflowParser`), then per-node
/// `NodeHandler::validate(config)`. This is the gate a workflow must clear
/// before the scheduler is ever invoked against it.
pub struct WorkflowValidator {
    parser: WorkflowParser,
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self { parser: WorkflowParser::new() }
    }

    /// Returns the computed waves on success so callers (the worker, mostly)
    /// don't have to recompute them before invoking the scheduler.
    pub fn validate(&self, workflow: &Workflow, registry: &NodeRegistry) -> Result<Vec<Vec<Uuid>>, ParseError> {
        self.parser.validate_structure(workflow)?;
        self.parser.validate_node_types(workflow, registry)?;
        let waves = self.parser.topological_waves(workflow)?;

        for node in &workflow.nodes {
            let handler = registry
                .get(&node.node_type)
                .expect("validate_node_types already checked every node type is registered");
            let outcome: ValidationOutcome = handler.validate(&node.config);
            if !outcome.valid {
                return Err(ParseError::InvalidNodeConfig(node.id, outcome.errors.join("; ")));
            }
        }

        self.warn_wave_zero_non_triggers(workflow, &waves);

        Ok(waves)
    }

    /// Non-fatal: a wave-0 node that isn't a `*-trigger` kind is unusual (it
    /// will run with no input besides the raw trigger payload) but not
    /// invalid, so this only logs rather than rejecting the workflow.
    fn warn_wave_zero_non_triggers(&self, workflow: &Workflow, waves: &[Vec<Uuid>]) {
        let Some(first_wave) = waves.first() else { return };
        for node_id in first_wave {
            if let Some(node) = workflow.nodes.iter().find(|n| n.id == *node_id) {
                if !node.node_type.ends_with("-trigger") {
                    tracing::debug!(
                        node_id = %node_id,
                        node_type = %node.node_type,
                        "wave-0 node is not a trigger kind"
                    );
                }
            }
        }
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::types::{Position, WorkflowEdge, WorkflowNode, WorkflowStatus};
    use serde_json::json;

    fn node(id: Uuid, node_type: &str, config: serde_json::Value) -> WorkflowNode {
        WorkflowNode { id, node_type: node_type.to_string(), label: "n".to_string(), position: Position::default(), config }
    }

    fn workflow(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "w".to_string(),
            description: None,
            status: WorkflowStatus::Active,
            nodes,
            edges,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn accepts_a_valid_single_node_workflow() {
        let registry = NodeRegistry::builtin();
        let validator = WorkflowValidator::new();
        let a = Uuid::from_u128(1);
        let wf = workflow(vec![node(a, "manual-trigger", json!({}))], vec![]);
        let waves = validator.validate(&wf, &registry).unwrap();
        assert_eq!(waves, vec![vec![a]]);
    }

    #[test]
    fn rejects_unknown_node_type() {
        let registry = NodeRegistry::builtin();
        let validator = WorkflowValidator::new();
        let a = Uuid::from_u128(1);
        let wf = workflow(vec![node(a, "not-a-real-kind", json!({}))], vec![]);
        assert!(matches!(validator.validate(&wf, &registry), Err(ParseError::UnknownNodeType(_))));
    }

    #[test]
    fn rejects_node_with_invalid_config() {
        let registry = NodeRegistry::builtin();
        let validator = WorkflowValidator::new();
        let a = Uuid::from_u128(1);
        let wf = workflow(vec![node(a, "llm", json!({"prompt": "hi"}))], vec![]);
        assert!(matches!(validator.validate(&wf, &registry), Err(ParseError::InvalidNodeConfig(_, _))));
    }
}
