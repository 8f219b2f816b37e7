//! HTML → `{title, metaDescription, textContent, links[]}` extraction
//! (§4.6), built on `scraper`'s CSS-selector API the way the teacher's
//! HTML extractor is, narrowed to the four fields the spec calls for.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

pub struct HtmlResult {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub text_content: String,
    pub links: Vec<String>,
}

pub fn parse_html(html_str: &str, base_url: &Url) -> HtmlResult {
    let document = Html::parse_document(html_str);

    let title = selector("title")
        .and_then(|s| document.select(&s).next())
        .map(|el| collapse_whitespace(&el.text().collect::<String>()));

    let meta_description = extract_meta_content(&document, "description");

    let text_content = extract_visible_text(&document);

    let links = extract_links(&document, base_url);

    HtmlResult {
        title,
        meta_description,
        text_content,
        links,
    }
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// §4.6: visible text with `<script>`, `<style>`, `<noscript>`, and
/// comments removed, entity-decoded, whitespace-collapsed. `scraper`
/// already strips comments and never yields text nodes for elements it
/// doesn't descend into, but script/style/noscript subtrees still show
/// up as text nodes, so they're filtered out explicitly below.
fn extract_visible_text(document: &Html) -> String {
    let Some(body_sel) = selector("body") else {
        return String::new();
    };
    let Some(body) = document.select(&body_sel).next() else {
        return String::new();
    };

    let skip: HashSet<&str> = ["script", "style", "noscript"].into_iter().collect();
    let mut pieces = Vec::new();

    for node in body.descendants() {
        if let Some(element) = node.value().as_element() {
            if skip.contains(element.name()) {
                continue;
            }
        }
        if let Some(text) = node.value().as_text() {
            let is_skipped_ancestor = node
                .ancestors()
                .filter_map(|a| a.value().as_element())
                .any(|e| skip.contains(e.name()));
            if !is_skipped_ancestor {
                pieces.push(text.to_string());
            }
        }
    }

    collapse_whitespace(&pieces.join(" "))
}

fn extract_meta_content(document: &Html, name: &str) -> Option<String> {
    let sel = selector(&format!("meta[name='{}']", name))?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// §4.6: every `<a href>` resolved against `baseUrl`; skip
/// `javascript:`, `mailto:`, `tel:`, empty, and fragment-only URLs;
/// dedupe within the page.
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for el in document.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let lower = href.to_lowercase();
        if lower.starts_with("javascript:")
            || lower.starts_with("mailto:")
            || lower.starts_with("tel:")
            || lower.starts_with("data:")
        {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        let absolute = resolved.to_string();
        if seen.insert(absolute.clone()) {
            links.push(absolute);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[test]
    fn extracts_title_and_description() {
        let html = r#"<html><head><title>  Hello   World </title>
            <meta name="description" content="a page about things"></head>
            <body>text</body></html>"#;
        let result = parse_html(html, &base());
        assert_eq!(result.title.as_deref(), Some("Hello World"));
        assert_eq!(result.meta_description.as_deref(), Some("a page about things"));
    }

    #[test]
    fn strips_scripts_and_styles_from_text() {
        let html = r#"<html><body>
            <p>Visible text</p>
            <script>var x = "hidden";</script>
            <style>.a{color:red}</style>
            <noscript>no js here</noscript>
        </body></html>"#;
        let result = parse_html(html, &base());
        assert!(result.text_content.contains("Visible text"));
        assert!(!result.text_content.contains("hidden"));
        assert!(!result.text_content.contains("color:red"));
        assert!(!result.text_content.contains("no js here"));
    }

    #[test]
    fn resolves_and_filters_links() {
        let html = r##"<html><body>
            <a href="/a">a</a>
            <a href="https://other.com/b">b</a>
            <a href="javascript:void(0)">js</a>
            <a href="mailto:x@example.com">mail</a>
            <a href="#frag">frag</a>
            <a href="/a">dup</a>
        </body></html>"##;
        let result = parse_html(html, &base());
        assert_eq!(
            result.links,
            vec![
                "https://example.com/a".to_string(),
                "https://other.com/b".to_string(),
            ]
        );
    }

    #[test]
    fn tolerates_malformed_html() {
        let html = "<html><body><p>unclosed <div>nested";
        let result = parse_html(html, &base());
        assert!(result.text_content.contains("unclosed"));
    }
}
