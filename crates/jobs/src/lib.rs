pub mod model;
pub mod store;

pub use model::{
    Job, JobConfig, JobError, JobExecutionError, JobMetrics, JobResult, JobStatus, OutputFile,
    ResourceRequirements, RetryPolicy, ScheduleConfig,
};
pub use store::{BatchResult, HistoryEntry, JobStore, PgJobStore};
