pub mod html;

use crawlhub_core::{CrawlError, ParsedPage};
use url::Url;

/// Pages past this size are truncated before parsing; the parser never
/// fails because of a huge body.
const MAX_PARSE_SIZE: usize = 5 * 1024 * 1024;

/// §4.6 `parse(html, baseUrl)`. Tolerates malformed HTML by construction
/// (`scraper` never panics on invalid markup); this wrapper never
/// returns `Err` for parse problems, only surfaces them as empty fields.
pub fn parse(html: &[u8], base_url: &Url) -> Result<ParsedPage, CrawlError> {
    let body = if html.len() > MAX_PARSE_SIZE {
        &html[..MAX_PARSE_SIZE]
    } else {
        html
    };
    let body_str = String::from_utf8_lossy(body);

    let result = html::parse_html(&body_str, base_url);

    Ok(ParsedPage {
        title: result.title,
        meta_description: result.meta_description,
        text_content: result.text_content,
        links: result.links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_oversized_body_without_failing() {
        let mut html = String::from("<html><body>");
        html.push_str(&"x".repeat(MAX_PARSE_SIZE + 10));
        html.push_str("</body></html>");
        let base = Url::parse("https://example.com/").unwrap();
        let result = parse(html.as_bytes(), &base);
        assert!(result.is_ok());
    }
}
