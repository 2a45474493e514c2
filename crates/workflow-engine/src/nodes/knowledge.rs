use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::node_api::{config_str, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};
use crate::retrieval::{orchestrate, RetrievalConfig};

pub struct KnowledgeIngestNode;

#[async_trait]
impl NodeHandler for KnowledgeIngestNode {
    fn node_type(&self) -> &'static str {
        "knowledge-ingest"
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let corpus_id = config_str(&input.node_config, "corpus_id")
            .and_then(|s| Uuid::parse_str(&s).ok())
            .ok_or_else(|| NodeExecutionError::Failed("knowledge-ingest node requires a valid `corpus_id`".to_string()))?;
        let user_id = config_str(&input.node_config, "user_id")
            .and_then(|s| Uuid::parse_str(&s).ok())
            .ok_or_else(|| NodeExecutionError::Failed("knowledge-ingest node requires a valid `user_id`".to_string()))?;
        let title = config_str(&input.node_config, "title").unwrap_or_else(|| "untitled".to_string());
        let content_text = config_str(&input.node_config, "content_text")
            .or_else(|| input.data.get("text").and_then(|v| v.as_str()).map(str::to_string))
            .ok_or_else(|| NodeExecutionError::Failed("knowledge-ingest node requires `content_text`".to_string()))?;

        let outcome = ctx.ingest_knowledge(corpus_id, user_id, title, content_text).await?;
        ctx.set_memory("knowledge.activeCorpusId", json!(corpus_id.to_string()));

        let mut data = input.data.clone();
        let marker = json!({
            "document_id": outcome.document_id,
            "chunk_count": outcome.chunk_count,
            "corpus_id": corpus_id,
            "status": outcome.status,
        });
        if let Some(obj) = data.as_object_mut() {
            obj.insert("_knowledge_ingest".to_string(), marker);
        } else {
            data = json!({"value": data, "_knowledge_ingest": marker});
        }
        Ok(NodeOutput::new(data))
    }
}

pub struct KnowledgeRetrieveNode;

#[async_trait]
impl NodeHandler for KnowledgeRetrieveNode {
    fn node_type(&self) -> &'static str {
        "knowledge-retrieve"
    }

    async fn execute(&self, input: &NodeInput, ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let retrieval = input
            .node_config
            .get("retrieval")
            .cloned()
            .ok_or_else(|| NodeExecutionError::Failed("knowledge-retrieve node requires a `retrieval` block".to_string()))?;
        let config: RetrievalConfig = serde_json::from_value(retrieval)
            .map_err(|e| NodeExecutionError::Failed(format!("invalid `retrieval` block: {e}")))?;

        let outcome = orchestrate(ctx, &config).await?;

        let mut data = input.data.clone();
        let knowledge = outcome.to_json();
        if let Some(obj) = data.as_object_mut() {
            obj.insert("_knowledge".to_string(), knowledge);
        } else {
            data = json!({"value": data, "_knowledge": knowledge});
        }
        Ok(NodeOutput::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::StubContext;

    #[tokio::test]
    async fn ingest_requires_valid_corpus_id() {
        let node = KnowledgeIngestNode;
        let input = NodeInput {
            data: json!({}),
            node_config: json!({"corpus_id": "not-a-uuid", "user_id": Uuid::nil().to_string(), "content_text": "x"}),
        };
        assert!(node.execute(&input, &StubContext::new()).await.is_err());
    }

    #[tokio::test]
    async fn retrieve_requires_retrieval_block() {
        let node = KnowledgeRetrieveNode;
        let input = NodeInput {
            data: json!({}),
            node_config: json!({}),
        };
        assert!(node.execute(&input, &StubContext::new()).await.is_err());
    }

    #[tokio::test]
    async fn retrieve_surfaces_capability_missing_without_a_knowledge_backend() {
        let node = KnowledgeRetrieveNode;
        let input = NodeInput {
            data: json!({}),
            node_config: json!({"retrieval": {"strategy": "single", "retrievers": [{"key": "a", "query": "q"}]}}),
        };
        let err = node.execute(&input, &StubContext::new()).await.unwrap_err();
        assert!(matches!(err, NodeExecutionError::CapabilityMissing(_)));
    }
}
