pub mod job;
pub mod memory;
pub mod redis_backend;
pub mod retry;
pub mod trait_def;

pub use job::{
    ExecuteWorkflowPayload, IngestKnowledgeDocumentPayload, Job, QUEUE_KNOWLEDGE_INGESTION,
    QUEUE_WORKFLOW_EXECUTION,
};
pub use memory::InMemoryQueue;
pub use redis_backend::RedisQueue;
pub use retry::RetryPolicy;
pub use trait_def::{EnqueueOutcome, Queue, RetryDecision};
