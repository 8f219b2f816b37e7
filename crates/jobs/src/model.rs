//! Job lifecycle, config, and result types (§4.13), grounded on the
//! `Job`/`JobConfig`/`JobResult` model headers: getter/setter surface
//! collapsed into public fields (no encapsulation benefit in Rust),
//! business-logic methods kept with the same names and semantics.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crawlhub_core::Priority;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job id cannot be empty")]
    MissingId,
    #[error("user id cannot be empty")]
    MissingUserId,
    #[error("job type cannot be empty")]
    MissingJobType,
    #[error("progress must be between 0 and 100")]
    InvalidProgress,
    #[error("retry count cannot be negative")]
    NegativeRetryCount,
    #[error("max retries cannot be negative")]
    NegativeMaxRetries,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Opaque job-specific metadata; unknown keys round-trip untouched.
    pub metadata: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Option<Duration>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: generate_job_id(),
            user_id: user_id.into(),
            tenant_id: String::new(),
            job_type: job_type.into(),
            status: JobStatus::Queued,
            priority: Priority::Normal,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            scheduled_at: None,
            error_message: None,
            metadata: serde_json::Value::Null,
            retry_count: 0,
            max_retries: 3,
            timeout: None,
        }
    }

    pub fn set_progress(&mut self, progress: u8) {
        if progress > 100 {
            tracing::warn!(progress, "invalid progress value, must be 0-100");
            return;
        }
        self.progress = progress;
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.progress = 100;
    }

    pub fn fail(&mut self, error_message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error_message.into());
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) {
        if self.can_retry() {
            self.retry_count += 1;
            self.status = JobStatus::Retrying;
        }
    }

    pub fn is_expired(&self) -> bool {
        let (Some(timeout), Some(started_at)) = (self.timeout, self.started_at) else {
            return false;
        };
        let elapsed = Utc::now().signed_duration_since(started_at);
        elapsed > chrono::Duration::from_std(timeout).unwrap_or_default()
    }

    pub fn duration(&self) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// §8 invariant 10: `progress == 100` iff `status == Completed`.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok() && (self.progress == 100) == (self.status == JobStatus::Completed)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.id.is_empty() {
            return Err(JobError::MissingId);
        }
        if self.user_id.is_empty() {
            return Err(JobError::MissingUserId);
        }
        if self.job_type.is_empty() {
            return Err(JobError::MissingJobType);
        }
        if self.progress > 100 {
            return Err(JobError::InvalidProgress);
        }
        Ok(())
    }
}

fn generate_job_id() -> String {
    let timestamp = Utc::now().timestamp_millis();
    format!("job_{timestamp:x}")
}

fn generate_result_id() -> String {
    let timestamp = Utc::now().timestamp_millis();
    format!("result_{timestamp:x}")
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_cores: Option<u32>,
    pub memory_mb: Option<u64>,
    pub disk_space_mb: Option<u64>,
    pub network_bandwidth_mbps: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
            exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    pub fn calculate_delay(&self, retry_attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.initial_delay;
        }
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(retry_attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub cron_expression: Option<String>,
    pub recurring: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ScheduleConfig {
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_at.is_some()
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring && self.cron_expression.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() > at).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_type: String,
    pub name: String,
    pub description: String,
    pub timeout: Duration,
    pub default_priority: Priority,
    pub retry_policy: RetryPolicy,
    pub resource_requirements: ResourceRequirements,
    pub schedule_config: ScheduleConfig,
    pub parameters: HashMap<String, String>,
    pub tags: HashMap<String, String>,
    pub enabled: bool,
    pub concurrency_limit: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobConfig {
    /// §4.9: whether a session of this job type may execute right now,
    /// given the schedule and an already-running count for the type.
    pub fn can_execute_now(&self, running_count: u32) -> bool {
        if !self.enabled || self.schedule_config.is_expired() {
            return false;
        }
        if let Some(limit) = self.concurrency_limit {
            if running_count >= limit {
                return false;
            }
        }
        match self.schedule_config.scheduled_at {
            Some(at) => Utc::now() >= at,
            None => true,
        }
    }

    pub fn next_retry_delay(&self, retry_attempt: u32) -> Duration {
        self.retry_policy.calculate_delay(retry_attempt)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetrics {
    pub execution_duration: Duration,
    pub peak_memory_usage: Option<u64>,
    pub cpu_usage_percent: Option<f64>,
    pub network_bytes_received: Option<u64>,
    pub network_bytes_sent: Option<u64>,
    pub disk_bytes_read: Option<u64>,
    pub disk_bytes_written: Option<u64>,
    pub items_processed: Option<u64>,
    pub throughput_per_sec: Option<f64>,
    pub custom_metrics: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionError {
    pub error_code: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub error_category: Option<String>,
    pub http_status_code: Option<u16>,
    pub context: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    pub filepath: String,
    pub mime_type: String,
    pub file_size: u64,
    pub checksum: Option<String>,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Ring buffer capped at `LOG_MESSAGES_CAP` entries (§3), oldest dropped first.
const LOG_MESSAGES_CAP: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    pub job_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub final_status: JobStatus,
    pub result_data: serde_json::Value,
    pub error: Option<JobExecutionError>,
    pub metrics: JobMetrics,
    pub output_files: Vec<OutputFile>,
    pub metadata: HashMap<String, String>,
    pub log_messages: VecDeque<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobResult {
    pub fn new(job_id: impl Into<String>, user_id: impl Into<String>, tenant_id: impl Into<String>, final_status: JobStatus) -> Self {
        Self {
            id: generate_result_id(),
            job_id: job_id.into(),
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            final_status,
            result_data: serde_json::Value::Null,
            error: None,
            metrics: JobMetrics::default(),
            output_files: Vec::new(),
            metadata: HashMap::new(),
            log_messages: VecDeque::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn push_log_message(&mut self, message: impl Into<String>) {
        if self.log_messages.len() >= LOG_MESSAGES_CAP {
            self.log_messages.pop_front();
        }
        self.log_messages.push_back(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lifecycle_transitions() {
        let mut job = Job::new("crawl", "user-1");
        assert_eq!(job.status, JobStatus::Queued);

        job.start();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        job.complete();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.is_valid());
    }

    #[test]
    fn retry_is_capped_by_max_retries() {
        let mut job = Job::new("crawl", "user-1");
        job.max_retries = 2;
        job.fail("boom");

        assert!(job.can_retry());
        job.increment_retry();
        assert_eq!(job.retry_count, 1);
        job.status = JobStatus::Failed;
        assert!(job.can_retry());
        job.increment_retry();
        assert_eq!(job.retry_count, 2);

        job.status = JobStatus::Failed;
        assert!(!job.can_retry());
    }

    #[test]
    fn job_round_trips_through_json() {
        let mut job = Job::new("crawl", "user-1");
        job.metadata = serde_json::json!({"seed": "https://example.com"});
        let json = serde_json::to_string(&job).unwrap();
        let restored: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, job.id);
        assert_eq!(restored.metadata, job.metadata);
    }

    #[test]
    fn retry_policy_backs_off_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(30));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(60));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(120));
    }

    #[test]
    fn invalid_progress_rejected() {
        let mut job = Job::new("crawl", "user-1");
        job.set_progress(150);
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn job_result_round_trips_through_json() {
        let mut result = JobResult::new("job-1", "user-1", "tenant-1", JobStatus::Completed);
        result.result_data = serde_json::json!({"pagesCrawled": 42});
        let json = serde_json::to_string(&result).unwrap();
        let restored: JobResult = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, result.id);
        assert_eq!(restored.result_data, result.result_data);
        assert_eq!(restored.final_status, result.final_status);
    }

    #[test]
    fn log_messages_ring_buffer_drops_oldest_past_cap() {
        let mut result = JobResult::new("job-1", "user-1", "tenant-1", JobStatus::Processing);
        for i in 0..(LOG_MESSAGES_CAP + 10) {
            result.push_log_message(format!("line {i}"));
        }
        assert_eq!(result.log_messages.len(), LOG_MESSAGES_CAP);
        assert_eq!(result.log_messages.front().unwrap(), "line 10");
        assert_eq!(result.log_messages.back().unwrap(), &format!("line {}", LOG_MESSAGES_CAP + 9));
    }
}
