use std::sync::Arc;
use std::time::Duration;

use common::error::sanitize;
use persistence::PersistenceGateway;
use queue::{IngestKnowledgeDocumentPayload, Job, Queue};

/// Consumes `knowledge-ingestion` jobs (§4.6/§4.7): re-runs the chunk/embed
/// pipeline for a document already recorded by the gateway. The
/// `knowledge-ingest` node path calls `ingest_document` inline instead of
/// going through this queue; this worker exists for documents uploaded or
/// re-ingested outside a running workflow.
pub struct IngestionWorker {
    gateway: Arc<dyn PersistenceGateway>,
    queue: Arc<dyn Queue>,
}

impl IngestionWorker {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, queue: Arc<dyn Queue>) -> Self {
        Self { gateway, queue }
    }

    pub async fn run(&self, queue_name: &str) {
        loop {
            match self.queue.dequeue(queue_name).await {
                Ok(Some(job)) => self.handle(job).await,
                Ok(None) => tokio::time::sleep(Duration::from_millis(200)).await,
                Err(e) => {
                    tracing::error!(error = %e, "dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle(&self, job: Job) {
        let payload: IngestKnowledgeDocumentPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "malformed ingest-knowledge-document payload");
                let _ = self.queue.ack_failed(job, e.to_string()).await;
                return;
            }
        };

        match knowledge_service::ingest_document(&self.gateway, payload.document_id).await {
            Ok(outcome) => {
                tracing::info!(document_id = %payload.document_id, chunk_count = outcome.chunk_count, "document ingested");
                if let Err(e) = self.queue.ack_completed(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "ack_completed failed");
                }
            }
            Err(e) => {
                let message = sanitize(&e.to_string());
                tracing::warn!(job_id = %job.id, error = %message, "ingestion job failed, requeuing per retry policy");
                if let Err(e) = self.queue.ack_failed(job, message).await {
                    tracing::error!(error = %e, "ack_failed failed");
                }
            }
        }
    }
}
