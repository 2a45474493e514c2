use crate::node_api::SharedNodeHandler;
use crate::nodes;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide, read-mostly map of node-type name to handler, populated
/// once at startup (§5 "Shared resources").
pub struct NodeRegistry {
    handlers: HashMap<&'static str, SharedNodeHandler>,
}

impl NodeRegistry {
    pub fn get(&self, node_type: &str) -> Option<&SharedNodeHandler> {
        self.handlers.get(node_type)
    }

    pub fn builtin() -> Arc<Self> {
        let mut handlers: HashMap<&'static str, SharedNodeHandler> = HashMap::new();
        let all: Vec<SharedNodeHandler> = vec![
            Arc::new(nodes::triggers::WebhookTriggerNode),
            Arc::new(nodes::triggers::ManualTriggerNode),
            Arc::new(nodes::triggers::ScheduleTriggerNode),
            Arc::new(nodes::data_cleaner::DataCleanerNode),
            Arc::new(nodes::llm::LlmNode),
            Arc::new(nodes::json_validator::JsonValidatorNode),
            Arc::new(nodes::storage::StorageNode),
            Arc::new(nodes::log::LogNode),
            Arc::new(nodes::http::HttpRequestNode),
            Arc::new(nodes::condition::ConditionNode),
            Arc::new(nodes::code::CodeNode),
            Arc::new(nodes::transformer::TransformerNode),
            Arc::new(nodes::output::OutputNode),
            Arc::new(nodes::file_upload::FileUploadNode),
            Arc::new(nodes::memory::MemoryWriteNode),
            Arc::new(nodes::memory::MemoryReadNode),
            Arc::new(nodes::execution_control::ExecutionControlNode),
            Arc::new(nodes::evaluation::EvaluationNode),
            Arc::new(nodes::knowledge::KnowledgeIngestNode),
            Arc::new(nodes::knowledge::KnowledgeRetrieveNode),
        ];
        for handler in all {
            handlers.insert(handler.node_type(), handler);
        }
        Arc::new(Self { handlers })
    }

    /// Builds a registry from an explicit handler set, used by tests that
    /// need a stand-in node type alongside (or instead of) the builtins.
    #[cfg(test)]
    pub(crate) fn for_tests(handlers: Vec<SharedNodeHandler>) -> Arc<Self> {
        let mut map = HashMap::new();
        for handler in handlers {
            map.insert(handler.node_type(), handler);
        }
        Arc::new(Self { handlers: map })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_all_twenty_node_kinds() {
        let registry = NodeRegistry::builtin();
        let kinds = [
            "webhook-trigger",
            "manual-trigger",
            "schedule-trigger",
            "data-cleaner",
            "llm",
            "json-validator",
            "storage",
            "log",
            "http-request",
            "condition",
            "code",
            "transformer",
            "output",
            "file-upload",
            "memory-write",
            "memory-read",
            "execution-control",
            "evaluation",
            "knowledge-ingest",
            "knowledge-retrieve",
        ];
        assert_eq!(kinds.len(), 20);
        for kind in kinds {
            assert!(registry.get(kind).is_some(), "missing handler for {kind}");
        }
    }
}
