//! §6.1 HTTP API projected as a plain library facade: request/response
//! DTOs plus a `CrawlApi` that wires the session manager, document
//! store, and indexer together. No web framework sits in front of this;
//! an adapter binding these methods to actual routes is left to the
//! deployment, same as the engine crate leaves scheduling to its caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crawlhub_core::{ApiError, CrawlConfig, CrawlLog, CrawlResult};
use crawlhub_engine::{SessionManager, SessionStatus};
use crawlhub_fetcher::{matched_indicators, FetcherConfig, PageFetcher};
use crawlhub_storage::Storage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSiteRequest {
    pub url: String,
    pub max_pages: Option<u32>,
    pub max_depth: Option<u32>,
    pub restrict_to_seed_domain: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub max_redirects: Option<u32>,
    pub force: Option<bool>,
    pub spa_rendering_enabled: Option<bool>,
    pub include_full_content: Option<bool>,
    pub browserless_url: Option<String>,
    pub verify_ssl: Option<bool>,
}

impl AddSiteRequest {
    fn into_config(self, defaults: &CrawlConfig) -> (String, bool, CrawlConfig) {
        let force = self.force.unwrap_or(defaults.force);
        let config = CrawlConfig {
            max_pages: self.max_pages.unwrap_or(defaults.max_pages).clamp(1, 10_000),
            max_depth: self.max_depth.unwrap_or(defaults.max_depth).clamp(1, 10),
            restrict_to_seed_domain: self.restrict_to_seed_domain.unwrap_or(defaults.restrict_to_seed_domain),
            follow_redirects: self.follow_redirects.unwrap_or(defaults.follow_redirects),
            max_redirects: self.max_redirects.unwrap_or(defaults.max_redirects).min(20),
            force,
            spa_rendering_enabled: self.spa_rendering_enabled.unwrap_or(defaults.spa_rendering_enabled),
            include_full_content: self.include_full_content.unwrap_or(defaults.include_full_content),
            browserless_url: self.browserless_url.or_else(|| defaults.browserless_url.clone()),
            verify_ssl: self.verify_ssl.unwrap_or(defaults.verify_ssl),
            ..defaults.clone()
        };
        (self.url, force, config)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSiteData {
    pub url: String,
    pub session_id: String,
    pub status: &'static str,
    #[serde(flatten)]
    pub config: CrawlConfig,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error: Option<&'static str>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), message: None, error: None }
    }
}

impl<T> From<ApiError> for Envelope<T> {
    fn from(err: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(err.to_string()),
            error: Some(err.error_code()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default)]
    pub results: bool,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    #[serde(flatten)]
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<CrawlResult>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailsQuery {
    pub domain: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}
fn default_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaDetectRequest {
    pub url: String,
    pub timeout: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaDetection {
    pub is_spa: bool,
    pub indicators: Vec<&'static str>,
    pub confidence: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaDetectData {
    pub http_status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_size: usize,
    pub spa_detection: SpaDetection,
    pub content_preview: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaRenderRequest {
    pub url: String,
    pub timeout: Option<u64>,
    pub include_full_content: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaRenderData {
    pub is_spa: bool,
    pub rendering_method: &'static str,
    pub content: String,
}

/// One confidence point per matched marker, capped at 100 (§9 open
/// question: no probabilistic model is specified, so indicator count is
/// used directly as a bounded score).
fn confidence_from(indicators: &[&'static str]) -> u8 {
    (indicators.len() * 20).min(100) as u8
}

pub struct CrawlApi {
    sessions: Arc<SessionManager>,
    storage: Arc<Storage>,
    default_config: CrawlConfig,
}

impl CrawlApi {
    pub fn new(sessions: Arc<SessionManager>, storage: Arc<Storage>, default_config: CrawlConfig) -> Self {
        Self { sessions, storage, default_config }
    }

    /// `POST /api/crawl/add-site`.
    pub fn add_site(&self, req: AddSiteRequest) -> Result<AddSiteData, ApiError> {
        if req.url.trim().is_empty() {
            return Err(ApiError::Validation {
                field: "url".to_string(),
                reason: "required".to_string(),
            });
        }
        let (url, force, config) = req.into_config(&self.default_config);
        let session_id = self.sessions.start_crawl(&url, config.clone(), force)?;
        Ok(AddSiteData {
            url,
            session_id,
            status: "queued",
            config,
        })
    }

    /// `GET /api/crawl/status`. `sessionId` selects a single session;
    /// omitted, every active session is reported.
    pub async fn crawl_status(&self, session_id: Option<&str>, query: StatusQuery) -> Result<Vec<StatusData>, ApiError> {
        let ids: Vec<String> = match session_id {
            Some(id) => vec![id.to_string()],
            None => self.sessions.active_sessions(),
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(status) = self.sessions.get_status(&id).await else {
                continue;
            };
            let results = if query.results {
                let mut all = self.sessions.get_results(&id).await.unwrap_or_default();
                if let Some(max) = query.max_results {
                    all.truncate(max);
                }
                Some(all)
            } else {
                None
            };
            out.push(StatusData { status, results });
        }

        if out.is_empty() && session_id.is_some() {
            return Err(ApiError::NotFound(format!("session {}", session_id.unwrap())));
        }
        Ok(out)
    }

    pub async fn stop_crawl(&self, session_id: &str) -> Result<(), ApiError> {
        if self.sessions.stop_crawl(session_id).await {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("session {session_id}")))
        }
    }

    /// `GET /api/crawl/details?domain=...|url=...`.
    pub async fn crawl_details(&self, query: DetailsQuery) -> Result<Vec<CrawlLog>, ApiError> {
        let logs = if let Some(domain) = &query.domain {
            self.storage.get_crawl_logs_by_domain(domain).await
        } else if let Some(url) = &query.url {
            self.storage.get_crawl_logs_by_url(url).await
        } else {
            return Err(ApiError::Validation {
                field: "domain|url".to_string(),
                reason: "one of domain or url is required".to_string(),
            });
        };
        logs.map_err(|e| ApiError::DependencyUnavailable(e.to_string()))
    }

    /// `GET /api/search?q=...&page=...&limit=...`.
    pub async fn search(&self, query: SearchQuery) -> Result<crawlhub_search::SearchPage, ApiError> {
        let Some(q) = query.q.filter(|q| !q.trim().is_empty()) else {
            return Err(ApiError::Validation {
                field: "q".to_string(),
                reason: "required".to_string(),
            });
        };
        let page = query.page.clamp(1, 1000);
        let limit = query.limit.clamp(1, 100);

        let Some(indexer) = self.storage.indexer() else {
            return Err(ApiError::DependencyUnavailable("search index not configured".to_string()));
        };
        let mut guard = indexer.lock().await;
        guard
            .search(&q, page, limit)
            .await
            .map_err(|e| ApiError::DependencyUnavailable(e.to_string()))
    }

    /// `POST /api/spa/detect`.
    pub async fn spa_detect(&self, req: SpaDetectRequest) -> Result<SpaDetectData, ApiError> {
        let fetcher = PageFetcher::new(FetcherConfig {
            timeout: Duration::from_millis(req.timeout.unwrap_or(10_000)),
            user_agent: req.user_agent.unwrap_or_else(|| self.default_config.user_agent.clone()),
            spa_rendering_enabled: false,
            ..FetcherConfig::default()
        })
        .map_err(|e| ApiError::DependencyUnavailable(e.to_string()))?;

        let fetch = fetcher.fetch(&req.url).await;
        let lowercased = String::from_utf8_lossy(&fetch.content).to_lowercase();
        let indicators: Vec<&'static str> = matched_indicators(&lowercased).collect();
        let is_spa = !indicators.is_empty();

        Ok(SpaDetectData {
            http_status_code: fetch.http_status,
            content_type: fetch.content_type,
            content_size: fetch.content.len(),
            spa_detection: SpaDetection {
                is_spa,
                confidence: confidence_from(&indicators),
                indicators,
            },
            content_preview: String::from_utf8_lossy(&fetch.content).chars().take(500).collect(),
        })
    }

    /// `POST /api/spa/render`.
    pub async fn spa_render(&self, req: SpaRenderRequest) -> Result<SpaRenderData, ApiError> {
        let fetcher = PageFetcher::new(FetcherConfig {
            timeout: Duration::from_millis(req.timeout.unwrap_or(30_000)),
            spa_rendering_enabled: true,
            browserless_url: self.default_config.browserless_url.clone(),
            user_agent: self.default_config.user_agent.clone(),
            ..FetcherConfig::default()
        })
        .map_err(|e| ApiError::DependencyUnavailable(e.to_string()))?;

        let fetch = fetcher.fetch(&req.url).await;
        let rendering_method = match fetch.rendering_method {
            crawlhub_core::RenderingMethod::HeadlessBrowser => "headless_browser",
            crawlhub_core::RenderingMethod::DirectFetch => "direct_fetch",
        };
        let full = req.include_full_content.unwrap_or(false);
        let text = String::from_utf8_lossy(&fetch.content);
        let content = if full {
            text.into_owned()
        } else {
            text.chars().take(2000).collect()
        };

        Ok(SpaRenderData {
            is_spa: rendering_method == "headless_browser",
            rendering_method,
            content,
        })
    }
}
