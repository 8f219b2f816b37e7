//! Session Manager (§4.10): owns N concurrent sessions, a background
//! janitor, and the shared process-wide services each session borrows.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crawlhub_core::{ApiError, CrawlConfig, CrawlResult};
use crawlhub_domain::DomainManager;
use crawlhub_jobs::JobStore;
use crawlhub_logbus::LogBus;
use crawlhub_robots::RobotsPolicy;
use crawlhub_storage::Storage;

use crate::session::{CrawlSession, SessionState, SessionStatus, SharedDeps};

/// Fires exactly once per session, after its worker exits, with the
/// final results snapshot (§4.10 `onComplete`/`Notifier`).
pub trait Notifier: Send + Sync {
    fn notify_complete(&self, session_id: &str, results: &[CrawlResult]);
}

struct Entry {
    session: Arc<CrawlSession>,
    retrieved: RwLock<bool>,
    finished_at: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
}

/// TTL after which a finished, unretrieved session is still reclaimed by
/// the janitor so a caller that never polls doesn't leak memory forever.
const SESSION_TTL: Duration = Duration::from_secs(3600);
const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

pub struct SessionManager {
    sessions: DashMap<String, Entry>,
    deps: SharedDeps,
    max_sessions: usize,
    notifier: Option<Arc<dyn Notifier>>,
}

impl SessionManager {
    pub fn new(
        domains: Arc<DomainManager>,
        robots: Arc<RobotsPolicy>,
        logbus: Arc<LogBus>,
        storage: Arc<Storage>,
        jobs: Arc<dyn JobStore>,
        max_sessions: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            deps: SharedDeps { domains, robots, logbus, storage, jobs },
            max_sessions,
            notifier: None,
        })
    }

    pub fn with_notifier(mut self: Arc<Self>, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("set notifier before sharing").notifier = Some(notifier);
        self
    }

    /// §4.10 `startCrawl`. Fails fast with `RESOURCE_EXHAUSTED` once the
    /// configured session cap is hit (§5 backpressure).
    pub fn start_crawl(
        self: &Arc<Self>,
        url: &str,
        config: CrawlConfig,
        force: bool,
    ) -> Result<String, ApiError> {
        if self.active_sessions().len() >= self.max_sessions {
            return Err(ApiError::ResourceExhausted(
                "maximum concurrent crawl sessions reached".to_string(),
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = CrawlSession::new(session_id.clone(), config, self.deps.clone())
            .map_err(|e| ApiError::Internal {
                correlation_id: session_id.clone(),
                message: e.to_string(),
            })?;

        self.sessions.insert(
            session_id.clone(),
            Entry {
                session: Arc::clone(&session),
                retrieved: RwLock::new(false),
                finished_at: RwLock::new(None),
            },
        );

        let manager = Arc::clone(self);
        let sid = session_id.clone();
        let url = url.to_string();
        let url_for_spawn = url.clone();
        tokio::spawn(async move {
            session.add_seed_url(&url_for_spawn, force).await;
            let manager_for_callback = Arc::clone(&manager);
            let sid_for_callback = sid.clone();
            session.start(Some(Arc::new(move |completed_id: String| {
                manager_for_callback.on_session_complete(completed_id);
            })));
            let _ = sid_for_callback;
        });

        info!(session_id = %session_id, url, "crawl session started");
        Ok(session_id)
    }

    fn on_session_complete(self: &Arc<Self>, session_id: String) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(entry) = manager.sessions.get(&session_id) {
                *entry.finished_at.write().await = Some(chrono::Utc::now());
                let results = entry.session.results().await;
                if let Some(notifier) = &manager.notifier {
                    notifier.notify_complete(&session_id, &results);
                }
            }
        });
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<CrawlSession>> {
        self.sessions.get(session_id).map(|e| Arc::clone(&e.session))
    }

    pub async fn get_results(&self, session_id: &str) -> Option<Vec<CrawlResult>> {
        let entry = self.sessions.get(session_id)?;
        *entry.retrieved.write().await = true;
        Some(entry.session.results().await)
    }

    pub async fn get_status(&self, session_id: &str) -> Option<SessionStatus> {
        let entry = self.sessions.get(session_id)?;
        Some(entry.session.status().await)
    }

    pub async fn stop_crawl(&self, session_id: &str) -> bool {
        let Some(entry) = self.sessions.get(session_id) else {
            return false;
        };
        entry.session.stop().await;
        true
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Removes sessions whose worker has finished and whose results have
    /// been retrieved, or that have sat unretrieved past the TTL.
    pub async fn run_janitor_once(&self) {
        let mut to_remove = Vec::new();
        for entry in self.sessions.iter() {
            if entry.session.state().await != SessionState::Stopped {
                continue;
            }
            let retrieved = *entry.retrieved.read().await;
            let expired = entry
                .finished_at
                .read()
                .await
                .map(|at| chrono::Utc::now().signed_duration_since(at) > chrono::Duration::from_std(SESSION_TTL).unwrap())
                .unwrap_or(false);
            if retrieved || expired {
                to_remove.push(entry.key().clone());
            }
        }
        for id in to_remove {
            self.sessions.remove(&id);
            info!(session_id = %id, "janitor reclaimed session");
        }
    }

    pub fn spawn_janitor(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(JANITOR_INTERVAL).await;
                manager.run_janitor_once().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhausted_maps_to_503() {
        let err = ApiError::ResourceExhausted("maximum concurrent crawl sessions reached".to_string());
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.error_code(), "RESOURCE_EXHAUSTED");
    }
}
