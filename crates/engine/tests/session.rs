//! Exercises a full session against a mock HTTP server instead of a real
//! site, since no crawl target is reachable in CI. Needs a real Postgres
//! instance (`#[sqlx::test]` provisions and tears one down per test).

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crawlhub_core::{CrawlConfig, CrawlStatus};
use crawlhub_domain::DomainManager;
use crawlhub_engine::{CrawlSession, SessionState, SharedDeps};
use crawlhub_jobs::PgJobStore;
use crawlhub_logbus::LogBus;
use crawlhub_robots::RobotsPolicy;
use crawlhub_storage::Storage;

async fn deps(pool: PgPool) -> SharedDeps {
    let job_store = PgJobStore::from_pool(pool.clone());
    job_store.run_migrations().await.expect("job tables migrate");

    SharedDeps {
        domains: Arc::new(DomainManager::default()),
        robots: Arc::new(RobotsPolicy::new(Duration::from_secs(60))),
        logbus: Arc::new(LogBus::new()),
        storage: Arc::new(Storage::from_pool(pool)),
        jobs: Arc::new(job_store),
    }
}

async fn wait_until_stopped(session: &Arc<CrawlSession>) {
    for _ in 0..100 {
        if session.state().await == SessionState::Stopped {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session never reached STOPPED");
}

#[sqlx::test(migrations = "../storage/migrations")]
async fn crawls_linked_page_within_seed_domain(pool: PgPool) {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(format!(
                    "<html><head><title>home</title></head><body><a href=\"{}/page2\">next</a></body></html>",
                    server.uri()
                )),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html><head><title>page two</title></head><body>no links here</body></html>"),
        )
        .mount(&server)
        .await;

    let cfg = CrawlConfig {
        max_pages: 5,
        max_depth: 2,
        respect_robots_txt: true,
        restrict_to_seed_domain: true,
        request_timeout: Duration::from_secs(5),
        ..CrawlConfig::default()
    };

    let session = CrawlSession::new("session-under-test", cfg, deps(pool).await).expect("session builds");
    session.add_seed_url(&format!("{}/", server.uri()), false).await;
    session.start(None);

    wait_until_stopped(&session).await;

    let results = session.results().await;
    assert_eq!(results.len(), 2, "seed page and its one link should both be tracked");
    assert!(results.iter().all(|r| r.crawl_status == CrawlStatus::Downloaded));

    let status = session.status().await;
    assert!(!status.is_running);
    assert_eq!(status.statistics.successful_crawls, 2);
}

#[sqlx::test(migrations = "../storage/migrations")]
async fn stop_halts_worker_before_frontier_drains(pool: PgPool) {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html><body>lonely page</body></html>"),
        )
        .mount(&server)
        .await;

    let cfg = CrawlConfig {
        max_pages: 1000,
        respect_robots_txt: false,
        ..CrawlConfig::default()
    };

    let session = CrawlSession::new("stoppable-session", cfg, deps(pool).await).expect("session builds");
    session.add_seed_url(&format!("{}/", server.uri()), false).await;
    session.start(None);

    // Give the worker a moment to pick up the seed before stopping it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await;

    wait_until_stopped(&session).await;
    assert_eq!(session.state().await, SessionState::Stopped);
}
