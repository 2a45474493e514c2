use crate::gateway::{CorpusFilter, PersistenceGateway, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::PersistenceError;
use common::types::*;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

/// Postgres-backed gateway. Raw `sqlx::query`/`query_as` with runtime binds,
/// not the `query!` compile-time-checked macros, matching the style
/// `audit-service::storage` used for its own hand-bound queries.
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend_err(e: sqlx::Error) -> PersistenceError {
    match e {
        sqlx::Error::RowNotFound => PersistenceError::NotFound("row not found".to_string()),
        other => PersistenceError::Backend(other.to_string()),
    }
}

fn workflow_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<Workflow, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let nodes_json: JsonValue = row.try_get("nodes")?;
    let edges_json: JsonValue = row.try_get("edges")?;
    Ok(Workflow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        status: if status_str == "active" {
            WorkflowStatus::Active
        } else {
            WorkflowStatus::Inactive
        },
        nodes: serde_json::from_value(nodes_json).unwrap_or_default(),
        edges: serde_json::from_value(edges_json).unwrap_or_default(),
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn execution_status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Canceled => "canceled",
    }
}

fn execution_status_from_str(s: &str) -> ExecutionStatus {
    match s {
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "canceled" => ExecutionStatus::Canceled,
        _ => ExecutionStatus::Pending,
    }
}

fn execution_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<Execution, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    Ok(Execution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: execution_status_from_str(&status_str),
        trigger_payload: row.try_get("trigger_payload")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        workflow_from_row(&row).map_err(backend_err)
    }

    async fn list_active_workflows(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter().map(|r| workflow_from_row(r).map_err(backend_err)).collect()
    }

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        trigger_payload: JsonValue,
    ) -> Result<Execution> {
        let row = sqlx::query(
            "INSERT INTO executions (id, workflow_id, status, trigger_payload, created_at)
             VALUES ($1, $2, 'pending', $3, now()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(workflow_id)
        .bind(trigger_payload)
        .fetch_one(&self.pool)
        .await
        .map_err(backend_err)?;
        execution_from_row(&row).map_err(backend_err)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Execution> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        execution_from_row(&row).map_err(backend_err)
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE executions SET status = $2,
                 started_at = COALESCE($3, started_at),
                 finished_at = COALESCE($4, finished_at),
                 error_message = COALESCE($5, error_message)
             WHERE id = $1",
        )
        .bind(id)
        .bind(execution_status_str(status))
        .bind(started_at)
        .bind(finished_at)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_executions_by_workflow(
        &self,
        workflow_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<Execution>> {
        let n = pagination.normalized();
        let total: i64 = sqlx::query("SELECT count(*) AS c FROM executions WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .try_get("c")
            .map_err(backend_err)?;
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE workflow_id = $1
             ORDER BY created_at ASC LIMIT $2 OFFSET $3",
        )
        .bind(workflow_id)
        .bind(n.limit as i64)
        .bind(n.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        let items = rows
            .iter()
            .map(|r| execution_from_row(r).map_err(backend_err))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, page: n.page, limit: n.limit, total })
    }

    async fn insert_step(&self, step: ExecutionStep) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution_steps
                 (id, execution_id, node_id, node_type, status, input, output, duration_ms, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(step.id)
        .bind(step.execution_id)
        .bind(step.node_id)
        .bind(step.node_type)
        .bind(format!("{:?}", step.status).to_lowercase())
        .bind(step.input)
        .bind(step.output)
        .bind(step.duration_ms)
        .bind(step.error)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStep>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_steps WHERE execution_id = $1 ORDER BY id ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        rows.iter()
            .map(|row| {
                let status_str: String = row.try_get("status").map_err(backend_err)?;
                Ok(ExecutionStep {
                    id: row.try_get("id").map_err(backend_err)?,
                    execution_id: row.try_get("execution_id").map_err(backend_err)?,
                    node_id: row.try_get("node_id").map_err(backend_err)?,
                    node_type: row.try_get("node_type").map_err(backend_err)?,
                    status: parse_step_status(&status_str),
                    input: row.try_get("input").map_err(backend_err)?,
                    output: row.try_get("output").map_err(backend_err)?,
                    duration_ms: row.try_get("duration_ms").map_err(backend_err)?,
                    error: row.try_get("error").map_err(backend_err)?,
                })
            })
            .collect()
    }

    async fn insert_attempt(&self, attempt: ExecutionStepAttempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution_step_attempts
                 (execution_id, node_id, node_type, attempt, status, duration_ms, reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(attempt.execution_id)
        .bind(attempt.node_id)
        .bind(attempt.node_type)
        .bind(attempt.attempt as i32)
        .bind(format!("{:?}", attempt.status).to_lowercase())
        .bind(attempt.duration_ms)
        .bind(attempt.reason)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_attempts(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionStepAttempt>> {
        let n = pagination.normalized();
        let total: i64 = sqlx::query("SELECT count(*) AS c FROM execution_step_attempts WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .try_get("c")
            .map_err(backend_err)?;
        let rows = sqlx::query(
            "SELECT * FROM execution_step_attempts WHERE execution_id = $1
             ORDER BY node_id ASC, attempt ASC LIMIT $2 OFFSET $3",
        )
        .bind(execution_id)
        .bind(n.limit as i64)
        .bind(n.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        let items = rows
            .iter()
            .map(|row| {
                let status_str: String = row.try_get("status").map_err(backend_err)?;
                Ok(ExecutionStepAttempt {
                    execution_id: row.try_get("execution_id").map_err(backend_err)?,
                    node_id: row.try_get("node_id").map_err(backend_err)?,
                    node_type: row.try_get("node_type").map_err(backend_err)?,
                    attempt: row.try_get::<i32, _>("attempt").map_err(backend_err)? as u32,
                    status: parse_attempt_status(&status_str),
                    duration_ms: row.try_get("duration_ms").map_err(backend_err)?,
                    reason: row.try_get("reason").map_err(backend_err)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, page: n.page, limit: n.limit, total })
    }

    async fn insert_snapshot(&self, snapshot: ExecutionContextSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution_context_snapshots
                 (execution_id, sequence, reason, node_id, node_type, state)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(snapshot.execution_id)
        .bind(snapshot.sequence as i64)
        .bind(format!("{:?}", snapshot.reason).to_lowercase())
        .bind(snapshot.node_id)
        .bind(snapshot.node_type)
        .bind(serde_json::to_value(&snapshot.state).unwrap_or(JsonValue::Null))
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_snapshots(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionContextSnapshot>> {
        let n = pagination.normalized();
        let total: i64 = sqlx::query("SELECT count(*) AS c FROM execution_context_snapshots WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .try_get("c")
            .map_err(backend_err)?;
        let rows = sqlx::query(
            "SELECT * FROM execution_context_snapshots WHERE execution_id = $1
             ORDER BY sequence ASC LIMIT $2 OFFSET $3",
        )
        .bind(execution_id)
        .bind(n.limit as i64)
        .bind(n.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        let items = rows
            .iter()
            .map(|row| {
                let reason_str: String = row.try_get("reason").map_err(backend_err)?;
                let state_json: JsonValue = row.try_get("state").map_err(backend_err)?;
                Ok(ExecutionContextSnapshot {
                    execution_id: row.try_get("execution_id").map_err(backend_err)?,
                    sequence: row.try_get::<i64, _>("sequence").map_err(backend_err)? as u64,
                    reason: parse_snapshot_reason(&reason_str),
                    node_id: row.try_get("node_id").map_err(backend_err)?,
                    node_type: row.try_get("node_type").map_err(backend_err)?,
                    state: serde_json::from_value(state_json)
                        .map_err(|e| PersistenceError::Backend(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, page: n.page, limit: n.limit, total })
    }

    async fn insert_retrieval_event(&self, event: ExecutionRetrievalEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution_retrieval_events
                 (execution_id, node_id, node_type, query, top_k, attempt, max_attempts,
                  status, matches_count, duration_ms, error_message, scope_type, corpus_id,
                  workflow_id_scope, execution_id_scope, strategy, retriever_key, branch_index, selected)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)",
        )
        .bind(event.execution_id)
        .bind(event.node_id)
        .bind(event.node_type)
        .bind(event.query)
        .bind(event.top_k as i32)
        .bind(event.attempt as i32)
        .bind(event.max_attempts as i32)
        .bind(format!("{:?}", event.status).to_lowercase())
        .bind(event.matches_count as i32)
        .bind(event.duration_ms)
        .bind(event.error_message)
        .bind(event.scope_type)
        .bind(event.corpus_id)
        .bind(event.workflow_id_scope)
        .bind(event.execution_id_scope)
        .bind(event.strategy)
        .bind(event.retriever_key)
        .bind(event.branch_index.map(|v| v as i32))
        .bind(event.selected)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_retrieval_events(
        &self,
        execution_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<ExecutionRetrievalEvent>> {
        let n = pagination.normalized();
        let total: i64 = sqlx::query("SELECT count(*) AS c FROM execution_retrieval_events WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .try_get("c")
            .map_err(backend_err)?;
        let rows = sqlx::query(
            "SELECT * FROM execution_retrieval_events WHERE execution_id = $1
             ORDER BY node_id ASC, attempt ASC LIMIT $2 OFFSET $3",
        )
        .bind(execution_id)
        .bind(n.limit as i64)
        .bind(n.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        let items = rows
            .iter()
            .map(|row| {
                let status_str: String = row.try_get("status").map_err(backend_err)?;
                Ok(ExecutionRetrievalEvent {
                    execution_id: row.try_get("execution_id").map_err(backend_err)?,
                    node_id: row.try_get("node_id").map_err(backend_err)?,
                    node_type: row.try_get("node_type").map_err(backend_err)?,
                    query: row.try_get("query").map_err(backend_err)?,
                    top_k: row.try_get::<i32, _>("top_k").map_err(backend_err)? as u32,
                    attempt: row.try_get::<i32, _>("attempt").map_err(backend_err)? as u32,
                    max_attempts: row.try_get::<i32, _>("max_attempts").map_err(backend_err)? as u32,
                    status: parse_retrieval_event_status(&status_str),
                    matches_count: row.try_get::<i32, _>("matches_count").map_err(backend_err)? as u32,
                    duration_ms: row.try_get("duration_ms").map_err(backend_err)?,
                    error_message: row.try_get("error_message").map_err(backend_err)?,
                    scope_type: row.try_get("scope_type").map_err(backend_err)?,
                    corpus_id: row.try_get("corpus_id").map_err(backend_err)?,
                    workflow_id_scope: row.try_get("workflow_id_scope").map_err(backend_err)?,
                    execution_id_scope: row.try_get("execution_id_scope").map_err(backend_err)?,
                    strategy: row.try_get("strategy").map_err(backend_err)?,
                    retriever_key: row.try_get("retriever_key").map_err(backend_err)?,
                    branch_index: row
                        .try_get::<Option<i32>, _>("branch_index")
                        .map_err(backend_err)?
                        .map(|v| v as u32),
                    selected: row.try_get("selected").map_err(backend_err)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, page: n.page, limit: n.limit, total })
    }

    async fn create_corpus(&self, corpus: KnowledgeCorpus) -> Result<KnowledgeCorpus> {
        sqlx::query(
            "INSERT INTO knowledge_corpora
                 (id, user_id, name, description, scope_type, workflow_id, execution_id,
                  status, metadata, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(corpus.id)
        .bind(corpus.user_id)
        .bind(&corpus.name)
        .bind(&corpus.description)
        .bind(format!("{:?}", corpus.scope_type).to_lowercase())
        .bind(corpus.workflow_id)
        .bind(corpus.execution_id)
        .bind(format!("{:?}", corpus.status).to_lowercase())
        .bind(&corpus.metadata)
        .bind(corpus.created_at)
        .bind(corpus.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(corpus)
    }

    async fn get_corpus(&self, id: Uuid) -> Result<KnowledgeCorpus> {
        let row = sqlx::query("SELECT * FROM knowledge_corpora WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        corpus_from_row(&row).map_err(backend_err)
    }

    async fn update_corpus_status(&self, id: Uuid, status: CorpusStatus) -> Result<()> {
        sqlx::query("UPDATE knowledge_corpora SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(format!("{:?}", status).to_lowercase())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn list_corpora(&self, user_id: Uuid, pagination: Pagination) -> Result<Page<KnowledgeCorpus>> {
        let n = pagination.normalized();
        let total: i64 = sqlx::query("SELECT count(*) AS c FROM knowledge_corpora WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .try_get("c")
            .map_err(backend_err)?;
        let rows = sqlx::query(
            "SELECT * FROM knowledge_corpora WHERE user_id = $1
             ORDER BY created_at ASC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(n.limit as i64)
        .bind(n.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        let items = rows
            .iter()
            .map(|r| corpus_from_row(r).map_err(backend_err))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, page: n.page, limit: n.limit, total })
    }

    async fn create_document(&self, document: KnowledgeDocument) -> Result<KnowledgeDocument> {
        sqlx::query(
            "INSERT INTO knowledge_documents
                 (id, corpus_id, user_id, source_type, title, mime_type, content_text,
                  status, error, metadata, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
        )
        .bind(document.id)
        .bind(document.corpus_id)
        .bind(document.user_id)
        .bind(format!("{:?}", document.source_type).to_lowercase())
        .bind(&document.title)
        .bind(&document.mime_type)
        .bind(&document.content_text)
        .bind(format!("{:?}", document.status).to_lowercase())
        .bind(&document.error)
        .bind(&document.metadata)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<KnowledgeDocument> {
        let row = sqlx::query("SELECT * FROM knowledge_documents WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        document_from_row(&row).map_err(backend_err)
    }

    async fn update_document(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE knowledge_documents SET status = $2, error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(format!("{:?}", status).to_lowercase())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_documents(
        &self,
        corpus_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeDocument>> {
        let n = pagination.normalized();
        let total: i64 = sqlx::query("SELECT count(*) AS c FROM knowledge_documents WHERE corpus_id = $1")
            .bind(corpus_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .try_get("c")
            .map_err(backend_err)?;
        let rows = sqlx::query(
            "SELECT * FROM knowledge_documents WHERE corpus_id = $1
             ORDER BY created_at ASC LIMIT $2 OFFSET $3",
        )
        .bind(corpus_id)
        .bind(n.limit as i64)
        .bind(n.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        let items = rows
            .iter()
            .map(|r| document_from_row(r).map_err(backend_err))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, page: n.page, limit: n.limit, total })
    }

    async fn replace_chunks(&self, document_id: Uuid, chunks: Vec<KnowledgeChunk>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        sqlx::query("DELETE FROM knowledge_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO knowledge_chunks
                     (id, corpus_id, document_id, chunk_index, content, token_count,
                      embedding, embedding_model, metadata, created_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
            )
            .bind(chunk.id)
            .bind(chunk.corpus_id)
            .bind(chunk.document_id)
            .bind(chunk.chunk_index as i32)
            .bind(&chunk.content)
            .bind(chunk.token_count.map(|v| v as i32))
            .bind(serde_json::to_value(&chunk.embedding).unwrap_or(JsonValue::Null))
            .bind(&chunk.embedding_model)
            .bind(&chunk.metadata)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn list_chunks(
        &self,
        document_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<KnowledgeChunk>> {
        let n = pagination.normalized();
        let total: i64 = sqlx::query("SELECT count(*) AS c FROM knowledge_chunks WHERE document_id = $1")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .try_get("c")
            .map_err(backend_err)?;
        let rows = sqlx::query(
            "SELECT * FROM knowledge_chunks WHERE document_id = $1
             ORDER BY chunk_index ASC LIMIT $2 OFFSET $3",
        )
        .bind(document_id)
        .bind(n.limit as i64)
        .bind(n.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        let items = rows
            .iter()
            .map(|r| chunk_from_row(r).map_err(backend_err))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, page: n.page, limit: n.limit, total })
    }

    async fn candidate_chunks(&self, filter: CorpusFilter, limit: usize) -> Result<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(
            "SELECT kc.* FROM knowledge_chunks kc
             JOIN knowledge_documents kd ON kd.id = kc.document_id
             JOIN knowledge_corpora corp ON corp.id = kd.corpus_id
             WHERE corp.user_id = $1
               AND ($2::uuid IS NULL OR corp.id = $2)
               AND ($3::text IS NULL OR corp.scope_type = $3)
               AND ($4::uuid IS NULL OR corp.workflow_id = $4)
               AND ($5::uuid IS NULL OR corp.execution_id = $5)
             LIMIT $6",
        )
        .bind(filter.user_id)
        .bind(filter.corpus_id)
        .bind(filter.scope_type.map(|s| format!("{:?}", s).to_lowercase()))
        .bind(filter.workflow_id)
        .bind(filter.execution_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        rows.iter().map(|r| chunk_from_row(r).map_err(backend_err)).collect()
    }
}

fn corpus_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<KnowledgeCorpus, sqlx::Error> {
    let scope_str: String = row.try_get("scope_type")?;
    let status_str: String = row.try_get("status")?;
    Ok(KnowledgeCorpus {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        scope_type: parse_scope_type(&scope_str),
        workflow_id: row.try_get("workflow_id")?,
        execution_id: row.try_get("execution_id")?,
        status: parse_corpus_status(&status_str),
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn document_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<KnowledgeDocument, sqlx::Error> {
    let source_str: String = row.try_get("source_type")?;
    let status_str: String = row.try_get("status")?;
    Ok(KnowledgeDocument {
        id: row.try_get("id")?,
        corpus_id: row.try_get("corpus_id")?,
        user_id: row.try_get("user_id")?,
        source_type: parse_source_type(&source_str),
        title: row.try_get("title")?,
        mime_type: row.try_get("mime_type")?,
        content_text: row.try_get("content_text")?,
        status: parse_document_status(&status_str),
        error: row.try_get("error")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn chunk_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<KnowledgeChunk, sqlx::Error> {
    let embedding_json: JsonValue = row.try_get("embedding")?;
    Ok(KnowledgeChunk {
        id: row.try_get("id")?,
        corpus_id: row.try_get("corpus_id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get::<i32, _>("chunk_index")? as u32,
        content: row.try_get("content")?,
        token_count: row.try_get::<Option<i32>, _>("token_count")?.map(|v| v as u32),
        embedding: serde_json::from_value(embedding_json).unwrap_or_default(),
        embedding_model: row.try_get("embedding_model")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_step_status(s: &str) -> StepStatus {
    match s {
        "running" => StepStatus::Running,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        "skipped" => StepStatus::Skipped,
        _ => StepStatus::Pending,
    }
}

fn parse_attempt_status(s: &str) -> AttemptStatus {
    match s {
        "retry" => AttemptStatus::Retry,
        "failed" => AttemptStatus::Failed,
        _ => AttemptStatus::Completed,
    }
}

fn parse_snapshot_reason(s: &str) -> SnapshotReason {
    match s {
        "step" => SnapshotReason::Step,
        "final" => SnapshotReason::Final,
        "error" => SnapshotReason::Error,
        "canceled" => SnapshotReason::Canceled,
        _ => SnapshotReason::Init,
    }
}

fn parse_retrieval_event_status(s: &str) -> RetrievalEventStatus {
    match s {
        "empty" => RetrievalEventStatus::Empty,
        "failed" => RetrievalEventStatus::Failed,
        _ => RetrievalEventStatus::Success,
    }
}

fn parse_scope_type(s: &str) -> CorpusScopeType {
    match s {
        "workflow" => CorpusScopeType::Workflow,
        "execution" => CorpusScopeType::Execution,
        _ => CorpusScopeType::User,
    }
}

fn parse_corpus_status(s: &str) -> CorpusStatus {
    match s {
        "ready" => CorpusStatus::Ready,
        "failed" => CorpusStatus::Failed,
        _ => CorpusStatus::Ingesting,
    }
}

fn parse_source_type(s: &str) -> DocumentSourceType {
    match s {
        "inline" => DocumentSourceType::Inline,
        "api" => DocumentSourceType::Api,
        _ => DocumentSourceType::Upload,
    }
}

fn parse_document_status(s: &str) -> DocumentStatus {
    match s {
        "processing" => DocumentStatus::Processing,
        "ready" => DocumentStatus::Ready,
        "failed" => DocumentStatus::Failed,
        _ => DocumentStatus::Pending,
    }
}
