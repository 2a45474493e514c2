use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl RedisConfig {
    pub fn connection_string(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_name: String,
    pub schedule_poll_interval_secs: u64,
}

/// Per-execution budget defaults, seeded into [`crate::types::ExecutionContextState`]
/// at execution start. A workflow's nodes run against these unless a future
/// per-workflow override is introduced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    pub max_loops: u32,
    pub max_retries: u32,
    pub max_retrieval_requests: u64,
    pub max_retrieval_failures: u64,
    pub max_retrieval_duration_ms: u64,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            max_loops: env_u32("EXECUTION_MAX_LOOPS", 100),
            max_retries: env_u32("EXECUTION_MAX_RETRIES", 3),
            max_retrieval_requests: env_u64("EXECUTION_MAX_RETRIEVAL_REQUESTS", 50),
            max_retrieval_failures: env_u64("EXECUTION_MAX_RETRIEVAL_FAILURES", 10),
            max_retrieval_duration_ms: env_u64("EXECUTION_MAX_RETRIEVAL_DURATION_MS", 60_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub worker: WorkerConfig,
    pub execution_defaults: ExecutionDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/workflow_platform".to_string()),
                max_connections: env_u32("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_u32("DATABASE_MIN_CONNECTIONS", 2),
            },
            redis: RedisConfig {
                host: std::env::var("QUEUE_REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: std::env::var("QUEUE_REDIS_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(6379),
            },
            worker: WorkerConfig {
                concurrency: std::env::var("WORKER_CONCURRENCY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
                queue_name: std::env::var("WORKER_QUEUE_NAME")
                    .unwrap_or_else(|_| "workflow-execution".to_string()),
                schedule_poll_interval_secs: env_u64("SCHEDULE_POLL_INTERVAL_SECS", 30),
            },
            execution_defaults: ExecutionDefaults::default(),
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
