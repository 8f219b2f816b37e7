//! Page Fetcher (§4.5): HTTP GET with redirects, SPA detection, and an
//! optional headless-render fallback.
//!
//! The request/timing/response-building shape is grounded on the
//! teacher's per-network driver `fetch()` (measuring elapsed time with
//! `Instant`, building a response struct from status/headers/body) —
//! generalized here to a single clearnet `reqwest::Client` instead of a
//! SOCKS-proxied, multi-client round-robin driver.

use crawlhub_core::{CrawlError, PageFetchResult, RenderingMethod};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub max_body_size: usize,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub user_agent: String,
    pub verify_ssl: bool,
    pub spa_rendering_enabled: bool,
    pub browserless_url: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            follow_redirects: true,
            max_redirects: 10,
            user_agent: "crawlhub/1.0".to_string(),
            verify_ssl: true,
            spa_rendering_enabled: true,
            browserless_url: None,
        }
    }
}

/// Markers considered in `is_spa_page`. Public so `/api/spa/detect` (§6.1)
/// can report which ones triggered.
pub const SPA_INDICATORS: &[&str] = &[
    "data-reactroot",
    "__next_data__",
    "_nuxt/",
    "ng-app",
    "id=\"app\"",
    "id=\"root\"",
    "ng-version",
];

pub struct PageFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
    render_client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(config.max_redirects as usize)
            } else {
                reqwest::redirect::Policy::none()
            })
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CrawlError::Network(e.to_string()))?;

        let render_client = reqwest::Client::builder()
            .timeout(config.timeout * 2)
            .build()
            .map_err(|e| CrawlError::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            render_client,
        })
    }

    /// §4.5 contract: GET, surface final URL, run SPA detection, fall
    /// back to headless rendering if enabled and triggered. Never blocks
    /// indefinitely — every outbound call carries the configured timeout.
    pub async fn fetch(&self, url: &str) -> PageFetchResult {
        let start = Instant::now();
        let response = self.client.get(url).send().await;

        let mut result = match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let final_url = resp.url().to_string();
                let content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());
                match resp.bytes().await {
                    Ok(body) => {
                        if body.len() > self.config.max_body_size {
                            PageFetchResult {
                                success: false,
                                http_status: Some(status),
                                content_type,
                                content: Vec::new(),
                                final_url,
                                error_message: Some(format!(
                                    "body too large: {} bytes",
                                    body.len()
                                )),
                                transport_code: None,
                                response_time_ms: start.elapsed().as_millis() as u64,
                                rendering_method: RenderingMethod::DirectFetch,
                                redirect_loop: false,
                            }
                        } else {
                            PageFetchResult {
                                success: (200..300).contains(&status),
                                http_status: Some(status),
                                content_type,
                                content: body.to_vec(),
                                final_url,
                                error_message: None,
                                transport_code: None,
                                response_time_ms: start.elapsed().as_millis() as u64,
                                rendering_method: RenderingMethod::DirectFetch,
                                redirect_loop: false,
                            }
                        }
                    }
                    Err(e) => PageFetchResult {
                        success: false,
                        http_status: Some(status),
                        content_type,
                        content: Vec::new(),
                        final_url,
                        error_message: Some(e.to_string()),
                        transport_code: Some(classify_transport(&e)),
                        response_time_ms: start.elapsed().as_millis() as u64,
                        rendering_method: RenderingMethod::DirectFetch,
                        redirect_loop: e.is_redirect(),
                    },
                }
            }
            Err(e) => PageFetchResult {
                success: false,
                http_status: None,
                content_type: None,
                content: Vec::new(),
                final_url: url.to_string(),
                error_message: Some(e.to_string()),
                transport_code: Some(classify_transport(&e)),
                response_time_ms: start.elapsed().as_millis() as u64,
                rendering_method: RenderingMethod::DirectFetch,
                redirect_loop: e.is_redirect(),
            },
        };

        if result.success
            && self.config.spa_rendering_enabled
            && is_html(&result.content_type)
            && is_spa_page(&result.content)
        {
            if let Some(browserless) = &self.config.browserless_url {
                match self.render(browserless, &result.final_url).await {
                    Ok(rendered) => {
                        result.content = rendered;
                        result.rendering_method = RenderingMethod::HeadlessBrowser;
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "headless render failed, keeping direct fetch content");
                    }
                }
            }
        }

        result
    }

    async fn render(&self, browserless_url: &str, url: &str) -> Result<Vec<u8>, CrawlError> {
        let body = serde_json::json!({ "url": url, "waitForIdle": true });
        let resp = self
            .render_client
            .post(browserless_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CrawlError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CrawlError::Network(format!(
                "render endpoint returned {}",
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| CrawlError::Network(e.to_string()))
    }
}

/// Walks the error's source chain for DNS/TLS signal words, since
/// `reqwest::Error` exposes `is_connect()` but not which flavor of
/// connect failure it was.
fn classify_transport(e: &reqwest::Error) -> String {
    use std::error::Error as _;

    if e.is_timeout() {
        return "timeout".to_string();
    }
    if !e.is_connect() {
        return "unknown".to_string();
    }

    let mut text = e.to_string().to_lowercase();
    let mut source = e.source();
    while let Some(err) = source {
        text.push(' ');
        text.push_str(&err.to_string().to_lowercase());
        source = err.source();
    }

    if text.contains("dns") || text.contains("lookup") || text.contains("resolve") || text.contains("name or service not known") {
        "dns".to_string()
    } else if text.contains("certificate") || text.contains("tls") || text.contains("ssl") || text.contains("handshake") {
        "ssl".to_string()
    } else {
        "connection".to_string()
    }
}

fn is_html(content_type: &Option<String>) -> bool {
    content_type
        .as_deref()
        .map(|c| c.contains("text/html"))
        .unwrap_or(false)
}

/// §4.5 SPA detection: pattern match over known framework markers, or a
/// near-empty body with a single script tag (low text/markup ratio).
/// The confidence scoring mentioned in §9's open questions is left as a
/// simple boolean here; `/api/spa/detect` can expose the matched
/// indicators list for a caller that wants more detail.
pub fn is_spa_page(content: &[u8]) -> bool {
    let text = String::from_utf8_lossy(content).to_lowercase();

    if matched_indicators(&text).next().is_some() {
        return true;
    }

    let script_count = text.matches("<script").count();
    let body_start = text.find("<body");
    let body_text_len = body_start
        .map(|i| text[i..].len())
        .unwrap_or(text.len());

    script_count >= 1 && body_text_len < 2000 && text.contains("<div")
}

pub fn matched_indicators(lowercased_html: &str) -> impl Iterator<Item = &'static str> + '_ {
    SPA_INDICATORS
        .iter()
        .copied()
        .filter(move |marker| lowercased_html.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_framework_markers() {
        assert!(is_spa_page(b"<html><body><div id=\"root\"></div></body></html>"));
        assert!(is_spa_page(b"<html><body><div data-reactroot></div></body></html>"));
    }

    #[test]
    fn detects_near_empty_shell_with_script() {
        let html = br#"<html><body><div id="app"></div><script src="/bundle.js"></script></body></html>"#;
        assert!(is_spa_page(html));
    }

    #[test]
    fn does_not_flag_content_rich_page() {
        let mut html = String::from("<html><body>");
        for _ in 0..200 {
            html.push_str("<p>some real paragraph content here</p>");
        }
        html.push_str("</body></html>");
        assert!(!is_spa_page(html.as_bytes()));
    }
}
