use crate::embedding::build_deterministic_embedding;
use crate::ingestion::{ingest_document, IngestionOutcome};
use crate::retrieval::{BruteForceIndex, ScoredChunk, VectorIndex};
use chrono::Utc;
use common::error::{KnowledgeError, PersistenceError};
use common::types::*;
use persistence::{CorpusFilter, PersistenceGateway};
use std::sync::Arc;
use uuid::Uuid;

const EMBEDDING_DIM: usize = 64;

pub struct CreateCorpusRequest {
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub scope_type: CorpusScopeType,
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

pub struct QueryRequest {
    pub user_id: Uuid,
    pub query: String,
    pub top_k: usize,
    pub corpus_id: Option<Uuid>,
    pub scope_type: Option<CorpusScopeType>,
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

/// The library surface a thin HTTP gateway (out of scope here) would call
/// into for knowledge management — no router attached.
pub struct KnowledgeService {
    gateway: Arc<dyn PersistenceGateway>,
    index: BruteForceIndex,
}

impl KnowledgeService {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        let index = BruteForceIndex::new(gateway.clone());
        Self { gateway, index }
    }

    pub async fn create_corpus(&self, req: CreateCorpusRequest) -> Result<KnowledgeCorpus, KnowledgeError> {
        if req.scope_type == CorpusScopeType::Workflow && req.workflow_id.is_none() {
            return Err(KnowledgeError::IngestionFailed(
                "workflow-scoped corpus requires a workflow_id".to_string(),
            ));
        }
        if req.scope_type == CorpusScopeType::Execution && req.execution_id.is_none() {
            return Err(KnowledgeError::IngestionFailed(
                "execution-scoped corpus requires an execution_id".to_string(),
            ));
        }
        let now = Utc::now();
        let corpus = KnowledgeCorpus {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            name: req.name,
            description: req.description,
            scope_type: req.scope_type,
            workflow_id: req.workflow_id,
            execution_id: req.execution_id,
            status: CorpusStatus::Ingesting,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        self.gateway
            .create_corpus(corpus)
            .await
            .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))
    }

    pub async fn create_and_ingest_document(
        &self,
        corpus_id: Uuid,
        user_id: Uuid,
        source_type: DocumentSourceType,
        title: String,
        content_text: String,
    ) -> Result<IngestionOutcome, KnowledgeError> {
        let now = Utc::now();
        let document = KnowledgeDocument {
            id: Uuid::new_v4(),
            corpus_id,
            user_id,
            source_type,
            title,
            mime_type: None,
            content_text,
            status: DocumentStatus::Pending,
            error: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        let document = self
            .gateway
            .create_document(document)
            .await
            .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))?;
        ingest_document(&self.gateway, document.id).await
    }

    pub async fn list_corpora(
        &self,
        user_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeCorpus>, PersistenceError> {
        self.gateway.list_corpora(user_id, pagination).await
    }

    pub async fn list_documents(
        &self,
        corpus_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeDocument>, PersistenceError> {
        self.gateway.list_documents(corpus_id, pagination).await
    }

    pub async fn list_chunks(
        &self,
        document_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeChunk>, PersistenceError> {
        self.gateway.list_chunks(document_id, pagination).await
    }

    /// The §4.6 query path: embed the query text, scan candidate chunks
    /// scoped by `req`, return the top `top_k` by cosine similarity.
    pub async fn query(&self, req: QueryRequest) -> Result<Vec<ScoredChunk>, common::error::RetrievalError> {
        let embedding = build_deterministic_embedding(&req.query, EMBEDDING_DIM);
        let filter = CorpusFilter {
            user_id: req.user_id,
            corpus_id: req.corpus_id,
            scope_type: req.scope_type,
            workflow_id: req.workflow_id,
            execution_id: req.execution_id,
        };
        self.index.search(&embedding, filter, req.top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::InMemoryGateway;

    #[tokio::test]
    async fn workflow_scoped_corpus_requires_workflow_id() {
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(InMemoryGateway::new());
        let service = KnowledgeService::new(gateway);
        let result = service
            .create_corpus(CreateCorpusRequest {
                user_id: Uuid::new_v4(),
                name: "scoped".to_string(),
                description: None,
                scope_type: CorpusScopeType::Workflow,
                workflow_id: None,
                execution_id: None,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_and_ingest_then_query_returns_match() {
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(InMemoryGateway::new());
        let service = KnowledgeService::new(gateway);
        let user_id = Uuid::new_v4();
        let corpus = service
            .create_corpus(CreateCorpusRequest {
                user_id,
                name: "notes".to_string(),
                description: None,
                scope_type: CorpusScopeType::User,
                workflow_id: None,
                execution_id: None,
            })
            .await
            .unwrap();

        service
            .create_and_ingest_document(
                corpus.id,
                user_id,
                DocumentSourceType::Inline,
                "doc".to_string(),
                "the quick brown fox jumps over the lazy dog".to_string(),
            )
            .await
            .unwrap();

        let matches = service
            .query(QueryRequest {
                user_id,
                query: "the quick brown fox jumps over the lazy dog".to_string(),
                top_k: 5,
                corpus_id: None,
                scope_type: None,
                workflow_id: None,
                execution_id: None,
            })
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].score > 0.99);
    }
}
