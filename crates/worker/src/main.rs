use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use common::clock::SystemClock;
use common::config::AppConfig;
use common::secrets::InMemorySecretStore;
use knowledge_service::KnowledgeService;
use persistence::PgGateway;
use queue::{RedisQueue, RetryPolicy, QUEUE_KNOWLEDGE_INGESTION, QUEUE_WORKFLOW_EXECUTION};
use worker::{ExecutionWorker, IngestionWorker, SchedulePoller};
use workflow_engine::{NodeRegistry, NodeRunner, WorkflowScheduler};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "worker=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::default();

    let gateway: Arc<dyn persistence::PersistenceGateway> = Arc::new(
        PgGateway::connect(&config.database.url, config.database.max_connections)
            .await
            .expect("failed to connect to database"),
    );
    let queue: Arc<dyn queue::Queue> = Arc::new(
        RedisQueue::connect(&config.redis.host, config.redis.port, RetryPolicy::default())
            .await
            .expect("failed to connect to redis"),
    );

    let registry = NodeRegistry::builtin();
    let secrets = Arc::new(InMemorySecretStore::new());
    let knowledge_service = Arc::new(KnowledgeService::new(gateway.clone()));
    let runner = Arc::new(NodeRunner::new(registry.clone(), secrets, knowledge_service));
    let scheduler = Arc::new(WorkflowScheduler::new(gateway.clone(), runner));
    let clock = Arc::new(SystemClock);

    let poller = Arc::new(SchedulePoller::new(
        gateway.clone(),
        queue.clone(),
        clock.clone(),
        Duration::from_secs(config.worker.schedule_poll_interval_secs),
    ));
    poller.spawn();

    let ingestion_worker = Arc::new(IngestionWorker::new(gateway.clone(), queue.clone()));
    tokio::spawn(async move { ingestion_worker.run(QUEUE_KNOWLEDGE_INGESTION).await });

    let mut consumers = Vec::with_capacity(config.worker.concurrency);
    for _ in 0..config.worker.concurrency {
        let execution_worker = Arc::new(ExecutionWorker::new(
            gateway.clone(),
            queue.clone(),
            scheduler.clone(),
            registry.clone(),
            config.execution_defaults,
            clock.clone(),
        ));
        consumers.push(tokio::spawn(async move { execution_worker.run(QUEUE_WORKFLOW_EXECUTION).await }));
    }

    tracing::info!(concurrency = config.worker.concurrency, "worker started");

    for consumer in consumers {
        let _ = consumer.await;
    }
}
