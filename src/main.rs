mod api;
mod cli;
mod commands;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

use crawlhub_core::config::AppConfig;
use crawlhub_domain::DomainManager;
use crawlhub_engine::SessionManager;
use crawlhub_jobs::PgJobStore;
use crawlhub_logbus::LogBus;
use crawlhub_robots::RobotsPolicy;
use crawlhub_search::Indexer;
use crawlhub_storage::Storage;

use crate::api::CrawlApi;
use crate::cli::{Cli, Commands};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        eprintln!("config file {} not found, using defaults", cli.config);
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;
    config.apply_env_overrides();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let storage = Storage::new(&config.database.mongodb_uri).await?;
    storage.run_migrations().await?;

    let storage = match Indexer::connect(&config.search.redis_uri, config.search.index_name.clone()).await {
        Ok(indexer) => storage.with_indexer(indexer),
        Err(e) => {
            warn!(error = %e, "search backend unreachable at startup, search-dependent endpoints will fail until it recovers");
            storage
        }
    };
    let storage = Arc::new(storage);

    let domains = Arc::new(DomainManager::default());
    let robots = Arc::new(RobotsPolicy::new(config.robots.cache_ttl()));
    let logbus = Arc::new(LogBus::new());

    let job_store = PgJobStore::new(&config.database.mongodb_uri).await?;
    job_store.run_migrations().await?;
    let job_store: Arc<dyn crawlhub_jobs::JobStore> = Arc::new(job_store);

    let sessions = SessionManager::new(
        Arc::clone(&domains),
        Arc::clone(&robots),
        Arc::clone(&logbus),
        Arc::clone(&storage),
        job_store,
        config.crawl.max_sessions,
    );
    sessions.spawn_janitor();

    let mut default_config = crawlhub_core::CrawlConfig::default();
    default_config.user_agent = config.crawl.default_user_agent.clone();
    default_config.browserless_url = config.crawl.browserless_url.clone();

    let api = CrawlApi::new(Arc::clone(&sessions), Arc::clone(&storage), default_config);

    match cli.command {
        Commands::Crawl { url, max_pages, max_depth, force, no_restrict_domain, browserless_url, insecure } => {
            commands::run_crawl(&api, url, max_pages, max_depth, force, no_restrict_domain, browserless_url, insecure)?;
            // Give the spawned worker a moment to pick up the seed URL
            // before the process exits; a long-running server would keep
            // this task alive instead.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Commands::Status { session, results, max_results } => {
            commands::run_status(&api, session, results, max_results).await?;
        }
        Commands::Stop { session } => {
            commands::run_stop(&api, session).await?;
        }
        Commands::Details { domain, url } => {
            commands::run_details(&api, domain, url).await?;
        }
        Commands::Search { query, page, limit } => {
            commands::run_search(&api, query, page, limit).await?;
        }
        Commands::SpaDetect { url, timeout_ms } => {
            commands::run_spa_detect(&api, url, timeout_ms).await?;
        }
        Commands::SpaRender { url, timeout_ms, full } => {
            commands::run_spa_render(&api, url, timeout_ms, full).await?;
        }
    }

    Ok(())
}
