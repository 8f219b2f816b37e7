use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Crawl priority, used by the frontier to order the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Why a fetch attempt failed, with its retry characteristics baked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureType {
    None,
    Permanent4xx,
    RateLimited,
    Temporary5xx,
    Timeout,
    Connection,
    Dns,
    Ssl,
    RedirectLoop,
    RobotsBlocked,
    ContentTypeRejected,
    Unknown,
}

impl FailureType {
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            FailureType::None
                | FailureType::Permanent4xx
                | FailureType::RobotsBlocked
                | FailureType::ContentTypeRejected
                | FailureType::RedirectLoop
        )
    }

    pub fn default_backoff(&self) -> Duration {
        match self {
            FailureType::RateLimited => Duration::from_secs(60),
            FailureType::Timeout => Duration::from_secs(5),
            FailureType::Connection | FailureType::Dns | FailureType::Ssl => {
                Duration::from_secs(10)
            }
            FailureType::Temporary5xx => Duration::from_secs(15),
            _ => Duration::from_secs(0),
        }
    }
}

/// Crawl status of a single URL attempt, as tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlStatus {
    Queued,
    Downloading,
    Downloaded,
    RetryScheduled,
    Failed,
}

/// Per-domain politeness/circuit-breaker state (§3 Domain State).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of a single fetch, before parsing (§4.5).
#[derive(Debug, Clone)]
pub struct PageFetchResult {
    pub success: bool,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
    pub final_url: String,
    pub error_message: Option<String>,
    pub transport_code: Option<String>,
    pub response_time_ms: u64,
    pub rendering_method: RenderingMethod,
    pub redirect_loop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderingMethod {
    DirectFetch,
    HeadlessBrowser,
}

/// What the content parser hands back (§4.6).
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub text_content: String,
    pub links: Vec<String>,
}

/// Per-URL-attempt result (§3 CrawlResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    pub final_url: Option<String>,
    pub domain: String,
    pub crawl_status: CrawlStatus,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub content_size: usize,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub text_content: Option<String>,
    pub outbound_links: Vec<String>,
    pub error_message: Option<String>,
    pub failure_type: Option<FailureType>,
    pub transport_error_code: Option<String>,
    pub retry_count: u32,
    pub is_retry_attempt: bool,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_retry_time_ms: u64,
}

impl CrawlResult {
    pub fn queued(url: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            final_url: None,
            domain: domain.into(),
            crawl_status: CrawlStatus::Queued,
            http_status: None,
            content_type: None,
            content_size: 0,
            title: None,
            meta_description: None,
            text_content: None,
            outbound_links: Vec::new(),
            error_message: None,
            failure_type: None,
            transport_error_code: None,
            retry_count: 0,
            is_retry_attempt: false,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_retry_time_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastCrawlStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlMetadata {
    pub first_crawl_time: DateTime<Utc>,
    pub last_crawl_time: DateTime<Utc>,
    pub last_crawl_status: LastCrawlStatus,
    pub last_error_message: Option<String>,
    pub crawl_count: u64,
    pub http_status_code: Option<u16>,
    pub content_size: usize,
    pub content_type: Option<String>,
    pub crawl_duration_ms: u64,
}

/// Persisted, deduplicated page record (§3 IndexedPage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedPage {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub canonical_url: String,
    pub canonical_host: String,
    pub canonical_path: String,
    pub canonical_query: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub text_content: Option<String>,
    pub keywords: Vec<String>,
    pub word_count: usize,
    pub has_ssl: bool,
    pub is_indexed: bool,
    pub indexed_at: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub crawl_metadata: CrawlMetadata,
    pub outbound_links: Vec<String>,
    pub inbound_link_count: Option<u64>,
    pub page_rank: Option<f64>,
    pub content_quality: f64,
}

/// Append-only crawl log entry (§3 CrawlLog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlLog {
    pub url: String,
    pub domain: String,
    pub crawl_time: DateTime<Utc>,
    pub status: LastCrawlStatus,
    pub http_status_code: Option<u16>,
    pub error_message: Option<String>,
    pub content_size: usize,
    pub content_type: Option<String>,
    pub links: Vec<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Crawl configuration for a single session, echoed in `/api/crawl/add-site`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlConfig {
    pub max_pages: u32,
    pub max_depth: u32,
    pub restrict_to_seed_domain: bool,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub force: bool,
    pub spa_rendering_enabled: bool,
    pub include_full_content: bool,
    pub respect_robots_txt: bool,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub browserless_url: Option<String>,
    pub verify_ssl: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 1000,
            max_depth: 3,
            restrict_to_seed_domain: true,
            follow_redirects: true,
            max_redirects: 10,
            force: false,
            spa_rendering_enabled: true,
            include_full_content: false,
            respect_robots_txt: true,
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            user_agent: "crawlhub/1.0".to_string(),
            browserless_url: None,
            verify_ssl: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub session_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
}

pub type Metadata = HashMap<String, String>;
