use crate::embedding::cosine_similarity;
use async_trait::async_trait;
use common::error::RetrievalError;
use common::types::KnowledgeChunk;
use persistence::{CorpusFilter, PersistenceGateway};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

/// Abstraction over "find the chunks closest to this query embedding".
/// The shipped implementation is a brute-force cosine-similarity scan,
/// adequate for the deterministic stand-in embeddings this system produces;
/// a production deployment can substitute an ANN backend without touching
/// the orchestrator that consumes this trait.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(
        &self,
        query_embedding: &[f32],
        filter: CorpusFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError>;
}

pub struct BruteForceIndex {
    gateway: Arc<dyn PersistenceGateway>,
}

impl BruteForceIndex {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }
}

fn candidate_limit(top_k: usize) -> usize {
    (top_k * 40).clamp(top_k * 5, 1000)
}

#[async_trait]
impl VectorIndex for BruteForceIndex {
    async fn search(
        &self,
        query_embedding: &[f32],
        filter: CorpusFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let top_k = top_k.clamp(1, 50);
        let limit = candidate_limit(top_k);
        let candidates = self
            .gateway
            .candidate_chunks(filter, limit)
            .await
            .map_err(|e| RetrievalError::IndexError(e.to_string()))?;

        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .map(|chunk| {
                let score = cosine_similarity(query_embedding, &chunk.embedding);
                ScoredChunk { chunk, score }
            })
            .filter(|sc| sc.score.is_finite())
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::build_deterministic_embedding;
    use chrono::Utc;
    use common::types::*;
    use persistence::InMemoryGateway;
    use uuid::Uuid;

    #[tokio::test]
    async fn search_ranks_by_similarity_descending() {
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(InMemoryGateway::new());
        let user_id = Uuid::new_v4();
        let corpus = KnowledgeCorpus {
            id: Uuid::new_v4(),
            user_id,
            name: "c".to_string(),
            description: None,
            scope_type: CorpusScopeType::User,
            workflow_id: None,
            execution_id: None,
            status: CorpusStatus::Ready,
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
            title: "d".to_string(),
            mime_type: None,
            content_text: "n/a".to_string(),
            status: DocumentStatus::Ready,
            error: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        gateway.create_document(document.clone()).await.unwrap();

        let close_text = "rust async runtime";
        let far_text = "gardening tips for spring";
        let chunks = vec![
            KnowledgeChunk {
                id: Uuid::new_v4(),
                corpus_id: corpus.id,
                document_id: document.id,
                chunk_index: 0,
                content: far_text.to_string(),
                token_count: None,
                embedding: build_deterministic_embedding(far_text, 64),
                embedding_model: "sha256-stand-in-v1".to_string(),
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            },
            KnowledgeChunk {
                id: Uuid::new_v4(),
                corpus_id: corpus.id,
                document_id: document.id,
                chunk_index: 1,
                content: close_text.to_string(),
                token_count: None,
                embedding: build_deterministic_embedding(close_text, 64),
                embedding_model: "sha256-stand-in-v1".to_string(),
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            },
        ];
        gateway.replace_chunks(document.id, chunks).await.unwrap();

        let index = BruteForceIndex::new(gateway);
        let query = build_deterministic_embedding(close_text, 64);
        let results = index
            .search(&query, CorpusFilter { user_id, ..Default::default() }, 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.content, close_text);
    }
}
