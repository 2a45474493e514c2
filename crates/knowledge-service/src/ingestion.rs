use crate::chunk::{chunk_text, ChunkParams};
use crate::embedding::build_deterministic_embedding;
use chrono::Utc;
use common::error::{sanitize, KnowledgeError};
use common::types::{CorpusStatus, DocumentStatus, KnowledgeChunk};
use persistence::PersistenceGateway;
use std::sync::Arc;
use uuid::Uuid;

const EMBEDDING_DIM: usize = 64;
const EMBEDDING_MODEL: &str = "sha256-stand-in-v1";

#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub document_id: Uuid,
    pub chunk_count: usize,
    pub status: DocumentStatus,
}

/// Runs the ingestion pipeline (§4.6) for a single document: chunk, embed,
/// persist, then roll the owning corpus's status up from its documents.
/// Called synchronously from the `knowledge-ingest` node and asynchronously
/// from the ingestion queue consumer — both paths share this function.
pub async fn ingest_document(
    gateway: &Arc<dyn PersistenceGateway>,
    document_id: Uuid,
) -> Result<IngestionOutcome, KnowledgeError> {
    let document = gateway
        .get_document(document_id)
        .await
        .map_err(|_| KnowledgeError::DocumentNotFound(document_id))?;

    gateway
        .update_document(document_id, DocumentStatus::Processing, None)
        .await
        .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))?;
    gateway
        .update_corpus_status(document.corpus_id, CorpusStatus::Ingesting)
        .await
        .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))?;

    let result = run_pipeline(gateway, &document.content_text, document.corpus_id, document_id).await;

    match result {
        Ok(chunk_count) => {
            gateway
                .update_document(document_id, DocumentStatus::Ready, None)
                .await
                .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))?;
            roll_up_corpus_status(gateway, document.corpus_id).await?;
            Ok(IngestionOutcome {
                document_id,
                chunk_count,
                status: DocumentStatus::Ready,
            })
        }
        Err(err) => {
            let sanitized = sanitize(&err.to_string());
            gateway
                .update_document(document_id, DocumentStatus::Failed, Some(sanitized.clone()))
                .await
                .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))?;
            gateway
                .update_corpus_status(document.corpus_id, CorpusStatus::Failed)
                .await
                .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))?;
            Err(KnowledgeError::IngestionFailed(sanitized))
        }
    }
}

async fn run_pipeline(
    gateway: &Arc<dyn PersistenceGateway>,
    content_text: &str,
    corpus_id: Uuid,
    document_id: Uuid,
) -> Result<usize, KnowledgeError> {
    let text_chunks = chunk_text(content_text, ChunkParams::default());
    let now = Utc::now();
    let chunks: Vec<KnowledgeChunk> = text_chunks
        .into_iter()
        .map(|tc| KnowledgeChunk {
            id: Uuid::new_v4(),
            corpus_id,
            document_id,
            chunk_index: tc.index,
            embedding: build_deterministic_embedding(&tc.content, EMBEDDING_DIM),
            token_count: Some(((tc.content.chars().count() as f64) / 4.0).ceil() as u32),
            content: tc.content,
            embedding_model: EMBEDDING_MODEL.to_string(),
            metadata: serde_json::json!({}),
            created_at: now,
        })
        .collect();

    let count = chunks.len();
    gateway
        .replace_chunks(document_id, chunks)
        .await
        .map_err(|e| KnowledgeError::EmbeddingFailed(e.to_string()))?;
    Ok(count)
}

async fn roll_up_corpus_status(
    gateway: &Arc<dyn PersistenceGateway>,
    corpus_id: Uuid,
) -> Result<(), KnowledgeError> {
    let documents = gateway
        .list_documents(corpus_id, common::types::Pagination { page: 1, limit: 200 })
        .await
        .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))?;

    let status = if documents.items.iter().any(|d| d.status == DocumentStatus::Failed) {
        CorpusStatus::Failed
    } else if documents
        .items
        .iter()
        .any(|d| matches!(d.status, DocumentStatus::Pending | DocumentStatus::Processing))
    {
        CorpusStatus::Ingesting
    } else {
        CorpusStatus::Ready
    };

    gateway
        .update_corpus_status(corpus_id, status)
        .await
        .map_err(|e| KnowledgeError::IngestionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{CorpusScopeType, DocumentSourceType, KnowledgeCorpus, KnowledgeDocument};
    use persistence::InMemoryGateway;

    fn make_gateway() -> Arc<dyn PersistenceGateway> {
        Arc::new(InMemoryGateway::new())
    }

    async fn seed_document(gateway: &Arc<dyn PersistenceGateway>, content: &str) -> (Uuid, Uuid) {
        let user_id = Uuid::new_v4();
        let corpus = KnowledgeCorpus {
            id: Uuid::new_v4(),
            user_id,
            name: "test corpus".to_string(),
            description: None,
            scope_type: CorpusScopeType::User,
            workflow_id: None,
            execution_id: None,
            status: CorpusStatus::Ingesting,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        gateway.create_corpus(corpus.clone()).await.unwrap();

        let document = KnowledgeDocument {
            id: Uuid::new_v4(),
            corpus_id: corpus.id,
            user_id,
            source_type: DocumentSourceType::Inline,
            title: "doc".to_string(),
            mime_type: None,
            content_text: content.to_string(),
            status: DocumentStatus::Pending,
            error: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        gateway.create_document(document.clone()).await.unwrap();
        (corpus.id, document.id)
    }

    #[tokio::test]
    async fn ingestion_marks_document_and_corpus_ready() {
        let gateway = make_gateway();
        let (corpus_id, document_id) = seed_document(&gateway, "hello world, this is a test").await;

        let outcome = ingest_document(&gateway, document_id).await.unwrap();
        assert_eq!(outcome.status, DocumentStatus::Ready);
        assert_eq!(outcome.chunk_count, 1);

        let document = gateway.get_document(document_id).await.unwrap();
        assert_eq!(document.status, DocumentStatus::Ready);

        let corpus = gateway.get_corpus(corpus_id).await.unwrap();
        assert_eq!(corpus.status, CorpusStatus::Ready);
    }

    #[tokio::test]
    async fn reingesting_produces_identical_chunk_count() {
        let gateway = make_gateway();
        let text = "repeat ".repeat(500);
        let (_, document_id) = seed_document(&gateway, &text).await;

        let first = ingest_document(&gateway, document_id).await.unwrap();
        let second = ingest_document(&gateway, document_id).await.unwrap();
        assert_eq!(first.chunk_count, second.chunk_count);
    }
}
