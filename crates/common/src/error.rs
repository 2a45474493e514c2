use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("empty workflow")]
    EmptyWorkflow,

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(Uuid),

    #[error("invalid edge source: {0}")]
    InvalidEdgeSource(Uuid),

    #[error("invalid edge target: {0}")]
    InvalidEdgeTarget(Uuid),

    #[error("no starting node found")]
    NoStartingNode,

    #[error("cycle detected at node: {0}")]
    CycleDetected(Uuid),

    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("invalid config for node {0}: {1}")]
    InvalidNodeConfig(Uuid, String),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("node execution failed: {0}, reason: {1}")]
    NodeExecutionFailed(Uuid, String),

    #[error("execution canceled")]
    Canceled,

    #[error("loop budget exceeded: {0}")]
    LoopBudgetExceeded(u32),

    #[error("retry budget exceeded: {0}")]
    RetryBudgetExceeded(u32),

    #[error("control terminate requested")]
    Terminated,

    #[error("sandbox execution failed: {0}")]
    SandboxFailed(String),

    #[error("template resolution failed: {0}")]
    TemplateFailed(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("wave computation failed: {0}")]
    WaveComputationFailed(String),

    #[error("concurrent context conflict on execution: {0}")]
    ContextConflict(Uuid),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("corpus not found: {0}")]
    CorpusNotFound(Uuid),

    #[error("retrieval request budget exceeded: {0}")]
    RequestBudgetExceeded(u64),

    #[error("retrieval failure budget exceeded: {0}")]
    FailureBudgetExceeded(u64),

    #[error("retrieval duration budget exceeded: {0}ms")]
    DurationBudgetExceeded(u64),

    #[error("unknown retrieval strategy: {0}")]
    UnknownStrategy(String),

    #[error("vector index error: {0}")]
    IndexError(String),
}

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("corpus not found: {0}")]
    CorpusNotFound(Uuid),

    #[error("ingestion failed: {0}")]
    IngestionFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("duplicate job id: {0}")]
    DuplicateJobId(String),

    #[error("retries exhausted for job: {0}")]
    RetriesExhausted(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Strips bearer tokens and `key=...` style secrets from error strings and
/// log lines before they leave the process boundary.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for token in input.split_inclusive(char::is_whitespace) {
        let trimmed = token.trim_end();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("bearer") {
            out.push_str("[redacted] ");
            continue;
        }
        if let Some(eq) = trimmed.find('=') {
            let key = trimmed[..eq].to_ascii_lowercase();
            if key.ends_with("key") || key.ends_with("token") || key.ends_with("secret") {
                out.push_str(&trimmed[..=eq]);
                out.push_str("[redacted] ");
                continue;
            }
        }
        out.push_str(token);
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_redacts_bearer_tokens() {
        let input = "calling provider with Bearer abc123xyz failed";
        assert!(!sanitize(input).contains("abc123xyz"));
    }

    #[test]
    fn sanitize_redacts_key_value_secrets() {
        let input = "request api_key=sk-live-deadbeef rejected";
        let sanitized = sanitize(input);
        assert!(!sanitized.contains("sk-live-deadbeef"));
        assert!(sanitized.contains("api_key="));
    }

    #[test]
    fn sanitize_leaves_plain_text_untouched() {
        let input = "node llm-1 failed after 3 attempts";
        assert_eq!(sanitize(input), input);
    }
}
