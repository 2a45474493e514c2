use crate::gateway::{CorpusFilter, PersistenceGateway, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::PersistenceError;
use common::types::*;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory `PersistenceGateway` used by unit tests, property tests, and the
/// end-to-end scenarios in §8. Mirrors the relational shape closely enough
/// that swapping in `PgGateway` changes no caller code.
#[derive(Default)]
pub struct InMemoryGateway {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
    steps: RwLock<HashMap<Uuid, Vec<ExecutionStep>>>,
    attempts: RwLock<HashMap<Uuid, Vec<ExecutionStepAttempt>>>,
    snapshots: RwLock<HashMap<Uuid, Vec<ExecutionContextSnapshot>>>,
    retrieval_events: RwLock<HashMap<Uuid, Vec<ExecutionRetrievalEvent>>>,
    corpora: RwLock<HashMap<Uuid, KnowledgeCorpus>>,
    documents: RwLock<HashMap<Uuid, KnowledgeDocument>>,
    chunks: RwLock<HashMap<Uuid, Vec<KnowledgeChunk>>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_workflow(&self, workflow: Workflow) {
        self.workflows.write().unwrap().insert(workflow.id, workflow);
    }
}

fn paginate<T: Clone>(items: Vec<T>, pagination: Pagination) -> Page<T> {
    let normalized = pagination.normalized();
    let total = items.len() as i64;
    let start = normalized.offset() as usize;
    let page_items = items
        .into_iter()
        .skip(start)
        .take(normalized.limit as usize)
        .collect();
    Page {
        items: page_items,
        page: normalized.page,
        limit: normalized.limit,
        total,
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow> {
        self.workflows
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("workflow {id}")))
    }

    async fn list_active_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self
            .workflows
            .read()
            .unwrap()
            .values()
            .filter(|w| w.status == WorkflowStatus::Active)
            .cloned()
            .collect())
    }

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        trigger_payload: JsonValue,
    ) -> Result<Execution> {
        let now = Utc::now();
        let execution = Execution {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            trigger_payload,
            started_at: None,
            finished_at: None,
            error_message: None,
            created_at: now,
        };
        self.executions
            .write()
            .unwrap()
            .insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Execution> {
        self.executions
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("execution {id}")))
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut executions = self.executions.write().unwrap();
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::NotFound(format!("execution {id}")))?;
        execution.status = status;
        if started_at.is_some() {
            execution.started_at = started_at;
        }
        if finished_at.is_some() {
            execution.finished_at = finished_at;
        }
        if error_message.is_some() {
            execution.error_message = error_message;
        }
        Ok(())
    }

    async fn list_executions_by_workflow(
        &self,
        workflow_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<Execution>> {
        let mut items: Vec<Execution> = self
            .executions
            .read()
            .unwrap()
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        items.sort_by_key(|e| e.created_at);
        Ok(paginate(items, pagination))
    }

    async fn insert_step(&self, step: ExecutionStep) -> Result<()> {
        self.steps
            .write()
            .unwrap()
            .entry(step.execution_id)
            .or_default()
            .push(step);
        Ok(())
    }

    async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStep>> {
        Ok(self
            .steps
            .read()
            .unwrap()
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_attempt(&self, attempt: ExecutionStepAttempt) -> Result<()> {
        self.attempts
            .write()
            .unwrap()
            .entry(attempt.execution_id)
            .or_default()
            .push(attempt);
        Ok(())
    }

    async fn list_attempts(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionStepAttempt>> {
        let items = self
            .attempts
            .read()
            .unwrap()
            .get(&execution_id)
            .cloned()
            .unwrap_or_default();
        Ok(paginate(items, pagination))
    }

    async fn insert_snapshot(&self, snapshot: ExecutionContextSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .unwrap()
            .entry(snapshot.execution_id)
            .or_default()
            .push(snapshot);
        Ok(())
    }

    async fn list_snapshots(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionContextSnapshot>> {
        let items = self
            .snapshots
            .read()
            .unwrap()
            .get(&execution_id)
            .cloned()
            .unwrap_or_default();
        Ok(paginate(items, pagination))
    }

    async fn insert_retrieval_event(&self, event: ExecutionRetrievalEvent) -> Result<()> {
        self.retrieval_events
            .write()
            .unwrap()
            .entry(event.execution_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn list_retrieval_events(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionRetrievalEvent>> {
        let items = self
            .retrieval_events
            .read()
            .unwrap()
            .get(&execution_id)
            .cloned()
            .unwrap_or_default();
        Ok(paginate(items, pagination))
    }

    async fn create_corpus(&self, corpus: KnowledgeCorpus) -> Result<KnowledgeCorpus> {
        self.corpora.write().unwrap().insert(corpus.id, corpus.clone());
        Ok(corpus)
    }

    async fn get_corpus(&self, id: Uuid) -> Result<KnowledgeCorpus> {
        self.corpora
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("corpus {id}")))
    }

    async fn update_corpus_status(&self, id: Uuid, status: CorpusStatus) -> Result<()> {
        let mut corpora = self.corpora.write().unwrap();
        let corpus = corpora
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::NotFound(format!("corpus {id}")))?;
        corpus.status = status;
        corpus.updated_at = Utc::now();
        Ok(())
    }

    async fn list_corpora(&self, user_id: Uuid, pagination: Pagination) -> Result<Page<KnowledgeCorpus>> {
        let mut items: Vec<KnowledgeCorpus> = self
            .corpora
            .read()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|c| c.created_at);
        Ok(paginate(items, pagination))
    }

    async fn create_document(&self, document: KnowledgeDocument) -> Result<KnowledgeDocument> {
        self.documents
            .write()
            .unwrap()
            .insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<KnowledgeDocument> {
        self.documents
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("document {id}")))
    }

    async fn update_document(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut documents = self.documents.write().unwrap();
        let document = documents
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::NotFound(format!("document {id}")))?;
        document.status = status;
        document.error = error;
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn list_documents(
        &self,
        corpus_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeDocument>> {
        let mut items: Vec<KnowledgeDocument> = self
            .documents
            .read()
            .unwrap()
            .values()
            .filter(|d| d.corpus_id == corpus_id)
            .cloned()
            .collect();
        items.sort_by_key(|d| d.created_at);
        Ok(paginate(items, pagination))
    }

    async fn replace_chunks(&self, document_id: Uuid, chunks: Vec<KnowledgeChunk>) -> Result<()> {
        self.chunks.write().unwrap().insert(document_id, chunks);
        Ok(())
    }

    async fn list_chunks(
        &self,
        document_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeChunk>> {
        let items = self
            .chunks
            .read()
            .unwrap()
            .get(&document_id)
            .cloned()
            .unwrap_or_default();
        Ok(paginate(items, pagination))
    }

    async fn candidate_chunks(&self, filter: CorpusFilter, limit: usize) -> Result<Vec<KnowledgeChunk>> {
        let corpora = self.corpora.read().unwrap();
        let matching_corpora: Vec<Uuid> = corpora
            .values()
            .filter(|c| c.user_id == filter.user_id)
            .filter(|c| filter.corpus_id.map_or(true, |id| id == c.id))
            .filter(|c| filter.scope_type.map_or(true, |s| s == c.scope_type))
            .filter(|c| filter.workflow_id.map_or(true, |w| c.workflow_id == Some(w)))
            .filter(|c| filter.execution_id.map_or(true, |e| c.execution_id == Some(e)))
            .map(|c| c.id)
            .collect();

        let documents = self.documents.read().unwrap();
        let matching_documents: std::collections::HashSet<Uuid> = documents
            .values()
            .filter(|d| matching_corpora.contains(&d.corpus_id))
            .map(|d| d.id)
            .collect();

        let chunks = self.chunks.read().unwrap();
        let mut result: Vec<KnowledgeChunk> = chunks
            .iter()
            .filter(|(document_id, _)| matching_documents.contains(document_id))
            .flat_map(|(_, v)| v.clone())
            .collect();
        result.truncate(limit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_corpus(user_id: Uuid) -> KnowledgeCorpus {
        KnowledgeCorpus {
            id: Uuid::new_v4(),
            user_id,
            name: "notes".to_string(),
            description: None,
            scope_type: CorpusScopeType::User,
            workflow_id: None,
            execution_id: None,
            status: CorpusStatus::Ready,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_execution_round_trips() {
        let gateway = InMemoryGateway::new();
        let workflow_id = Uuid::new_v4();
        let execution = gateway
            .create_execution(workflow_id, serde_json::json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        let fetched = gateway.get_execution(execution.id).await.unwrap();
        assert_eq!(fetched.workflow_id, workflow_id);
    }

    #[tokio::test]
    async fn missing_workflow_is_not_found() {
        let gateway = InMemoryGateway::new();
        let err = gateway.get_workflow(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn candidate_chunks_respects_corpus_scope() {
        let gateway = InMemoryGateway::new();
        let user_id = Uuid::new_v4();
        let corpus = sample_corpus(user_id);
        gateway.create_corpus(corpus.clone()).await.unwrap();

        let document = KnowledgeDocument {
            id: Uuid::new_v4(),
            corpus_id: corpus.id,
            user_id,
            source_type: DocumentSourceType::Inline,
            title: "doc".to_string(),
            mime_type: None,
            content_text: "hello world".to_string(),
            status: DocumentStatus::Ready,
            error: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        gateway.create_document(document.clone()).await.unwrap();

        let chunk = KnowledgeChunk {
            id: Uuid::new_v4(),
            corpus_id: corpus.id,
            document_id: document.id,
            chunk_index: 0,
            content: "hello world".to_string(),
            token_count: Some(3),
            embedding: vec![0.0; 64],
            embedding_model: "sha256-stand-in".to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        };
        gateway.replace_chunks(document.id, vec![chunk]).await.unwrap();

        let found = gateway
            .candidate_chunks(
                CorpusFilter {
                    user_id,
                    ..Default::default()
                },
                1000,
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let none = gateway
            .candidate_chunks(
                CorpusFilter {
                    user_id: Uuid::new_v4(),
                    ..Default::default()
                },
                1000,
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
