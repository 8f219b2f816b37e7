use anyhow::Result;

use crate::api::{
    AddSiteRequest, CrawlApi, DetailsQuery, Envelope, SearchQuery, SpaDetectRequest, SpaRenderRequest, StatusQuery,
};

fn print_ok<T: serde::Serialize>(data: T) {
    let body = Envelope::ok(data);
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
}

fn print_err(err: crawlhub_core::ApiError) {
    let body: Envelope<()> = err.into();
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
}

pub fn run_crawl(
    api: &CrawlApi,
    url: String,
    max_pages: Option<u32>,
    max_depth: Option<u32>,
    force: bool,
    no_restrict_domain: bool,
    browserless_url: Option<String>,
    insecure: bool,
) -> Result<()> {
    let req = AddSiteRequest {
        url,
        max_pages,
        max_depth,
        restrict_to_seed_domain: Some(!no_restrict_domain),
        follow_redirects: None,
        max_redirects: None,
        force: Some(force),
        spa_rendering_enabled: None,
        include_full_content: None,
        browserless_url,
        verify_ssl: insecure.then_some(false),
    };
    match api.add_site(req) {
        Ok(data) => print_ok(data),
        Err(e) => print_err(e),
    }
    Ok(())
}

pub async fn run_status(api: &CrawlApi, session: Option<String>, results: bool, max_results: Option<usize>) -> Result<()> {
    let query = StatusQuery { results, max_results };
    match api.crawl_status(session.as_deref(), query).await {
        Ok(data) => print_ok(data),
        Err(e) => print_err(e),
    }
    Ok(())
}

pub async fn run_stop(api: &CrawlApi, session: String) -> Result<()> {
    match api.stop_crawl(&session).await {
        Ok(()) => print_ok(serde_json::json!({ "sessionId": session, "stopped": true })),
        Err(e) => print_err(e),
    }
    Ok(())
}

pub async fn run_details(api: &CrawlApi, domain: Option<String>, url: Option<String>) -> Result<()> {
    let query = DetailsQuery { domain, url };
    match api.crawl_details(query).await {
        Ok(data) => print_ok(data),
        Err(e) => print_err(e),
    }
    Ok(())
}

pub async fn run_search(api: &CrawlApi, query: String, page: u32, limit: u32) -> Result<()> {
    let q = SearchQuery { q: Some(query), page, limit };
    match api.search(q).await {
        Ok(data) => print_ok(data),
        Err(e) => print_err(e),
    }
    Ok(())
}

pub async fn run_spa_detect(api: &CrawlApi, url: String, timeout_ms: Option<u64>) -> Result<()> {
    let req = SpaDetectRequest { url, timeout: timeout_ms, user_agent: None };
    match api.spa_detect(req).await {
        Ok(data) => print_ok(data),
        Err(e) => print_err(e),
    }
    Ok(())
}

pub async fn run_spa_render(api: &CrawlApi, url: String, timeout_ms: Option<u64>, full: bool) -> Result<()> {
    let req = SpaRenderRequest { url, timeout: timeout_ms, include_full_content: Some(full) };
    match api.spa_render(req).await {
        Ok(data) => print_ok(data),
        Err(e) => print_err(e),
    }
    Ok(())
}
