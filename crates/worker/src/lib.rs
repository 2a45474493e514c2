pub mod execution_worker;
pub mod ingestion_worker;
pub mod schedule_poller;

pub use execution_worker::ExecutionWorker;
pub use ingestion_worker::IngestionWorker;
pub use schedule_poller::SchedulePoller;
