use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::*;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, common::error::PersistenceError>;

/// Filter applied when locating candidate chunks for retrieval (§4.6 query path).
#[derive(Debug, Clone, Default)]
pub struct CorpusFilter {
    pub user_id: Uuid,
    pub corpus_id: Option<Uuid>,
    pub scope_type: Option<CorpusScopeType>,
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

/// Abstract persistence operations over every entity in the data model.
/// Production is backed by Postgres (`PgGateway`); tests use `InMemoryGateway`.
/// The engine never touches `sqlx`/connection types directly — only this trait.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow>;
    async fn list_active_workflows(&self) -> Result<Vec<Workflow>>;

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        trigger_payload: JsonValue,
    ) -> Result<Execution>;
    async fn get_execution(&self, id: Uuid) -> Result<Execution>;
    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
    ) -> Result<()>;
    async fn list_executions_by_workflow(
        &self,
        workflow_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<Execution>>;

    async fn insert_step(&self, step: ExecutionStep) -> Result<()>;
    async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStep>>;

    async fn insert_attempt(&self, attempt: ExecutionStepAttempt) -> Result<()>;
    async fn list_attempts(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionStepAttempt>>;

    async fn insert_snapshot(&self, snapshot: ExecutionContextSnapshot) -> Result<()>;
    async fn list_snapshots(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionContextSnapshot>>;

    async fn insert_retrieval_event(&self, event: ExecutionRetrievalEvent) -> Result<()>;
    async fn list_retrieval_events(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionRetrievalEvent>>;

    async fn create_corpus(&self, corpus: KnowledgeCorpus) -> Result<KnowledgeCorpus>;
    async fn get_corpus(&self, id: Uuid) -> Result<KnowledgeCorpus>;
    async fn update_corpus_status(&self, id: Uuid, status: CorpusStatus) -> Result<()>;
    async fn list_corpora(&self, user_id: Uuid, pagination: Pagination) -> Result<Page<KnowledgeCorpus>>;

    async fn create_document(&self, document: KnowledgeDocument) -> Result<KnowledgeDocument>;
    async fn get_document(&self, id: Uuid) -> Result<KnowledgeDocument>;
    async fn update_document(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<()>;
    async fn list_documents(
        &self,
        corpus_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeDocument>>;

    async fn replace_chunks(&self, document_id: Uuid, chunks: Vec<KnowledgeChunk>) -> Result<()>;
    async fn list_chunks(
        &self,
        document_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeChunk>>;
    async fn candidate_chunks(&self, filter: CorpusFilter, limit: usize) -> Result<Vec<KnowledgeChunk>>;
}
