//! Indexer client (§9 glossary: "external full-text search backend; the
//! crawler writes documents to it but does not own its index layout").
//!
//! The teacher queries Postgres directly with `ILIKE` because it owns
//! its own document store end to end. This spec explicitly treats the
//! search index as an opaque external dependency reachable over
//! `SEARCH_REDIS_URI`, so the ILIKE query shape doesn't carry over —
//! what does carry over is wrapping the client in one struct with
//! narrow, typed methods and converting connection failures into
//! `Result` rather than panicking mid-crawl.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub id: String,
    pub url: String,
    pub title: String,
    /// Title is double-weighted by repetition per §4.12 step 4, already
    /// folded into this string by the caller before `index()` is called.
    pub content: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<SearchHit>,
}

/// Naive 200-char prefix per §9's open-question resolution: the core
/// does not mandate highlighting, so a fixed-length prefix is used
/// unless the backend starts returning its own highlights.
const SNIPPET_LEN: usize = 200;

pub struct Indexer {
    conn: ConnectionManager,
    index_name: String,
}

impl Indexer {
    pub async fn connect(redis_uri: &str, index_name: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_uri).context("invalid redis uri")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("connecting to search backend")?;
        Ok(Self {
            conn,
            index_name: index_name.into(),
        })
    }

    fn terms_key(&self, word: &str) -> String {
        format!("{}:term:{}", self.index_name, word)
    }

    fn doc_key(&self, id: &str) -> String {
        format!("{}:doc:{}", self.index_name, id)
    }

    fn vocab_key(&self) -> String {
        format!("{}:vocab", self.index_name)
    }

    fn docs_set_key(&self) -> String {
        format!("{}:docs", self.index_name)
    }

    /// §4.12 step 4: best-effort push. Callers are expected to log and
    /// continue on `Err` rather than fail the whole crawl write.
    pub async fn index(&mut self, doc: &IndexDocument) -> Result<()> {
        let words = tokenize(&doc.content);
        let mut pipe = redis::pipe();
        pipe.atomic();

        pipe.hset(self.doc_key(&doc.id), "url", &doc.url);
        pipe.hset(self.doc_key(&doc.id), "title", &doc.title);
        pipe.sadd(self.docs_set_key(), &doc.id);

        let mut seen = HashSet::new();
        for word in &words {
            if !seen.insert(word.clone()) {
                continue;
            }
            pipe.sadd(self.terms_key(word), &doc.id);
            pipe.zadd(self.vocab_key(), word, 0);
        }

        pipe.query_async::<()>(&mut self.conn)
            .await
            .context("writing document to search backend")
    }

    pub async fn search(&mut self, query: &str, page: u32, limit: u32) -> Result<SearchPage> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(SearchPage {
                total: 0,
                page,
                page_size: limit,
                results: Vec::new(),
            });
        }

        let keys: Vec<String> = terms.iter().map(|t| self.terms_key(t)).collect();
        let ids: Vec<String> = if keys.len() == 1 {
            redis::cmd("SMEMBERS")
                .arg(&keys[0])
                .query_async(&mut self.conn)
                .await
                .context("querying search backend")?
        } else {
            redis::cmd("SINTER")
                .arg(&keys)
                .query_async(&mut self.conn)
                .await
                .context("querying search backend")?
        };

        let total = ids.len();
        let start = (page.saturating_sub(1) as usize) * limit as usize;
        let mut results = Vec::new();
        for id in ids.into_iter().skip(start).take(limit as usize) {
            let fields: std::collections::HashMap<String, String> = redis::cmd("HGETALL")
                .arg(self.doc_key(&id))
                .query_async(&mut self.conn)
                .await
                .context("fetching document")?;
            let title = fields.get("title").cloned().unwrap_or_default();
            let url = fields.get("url").cloned().unwrap_or_default();
            results.push(SearchHit {
                snippet: snippet(&title),
                title,
                url,
                score: 1.0,
            });
        }

        Ok(SearchPage {
            total,
            page,
            page_size: limit,
            results,
        })
    }

    pub async fn suggest(&mut self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_lowercase();
        let range_start = format!("[{prefix}");
        let range_end = format!("[{prefix}\u{FF}");
        let matches: Vec<String> = redis::cmd("ZRANGEBYLEX")
            .arg(self.vocab_key())
            .arg(range_start)
            .arg(range_end)
            .query_async(&mut self.conn)
            .await
            .context("querying suggestions")?;
        Ok(matches)
    }

    pub async fn total_indexed(&mut self) -> Result<usize> {
        let count: usize = redis::cmd("SCARD")
            .arg(self.docs_set_key())
            .query_async(&mut self.conn)
            .await
            .context("counting indexed documents")?;
        Ok(count)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_string())
        .collect()
}

fn snippet(content: &str) -> String {
    content.chars().take(SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_and_lowercases() {
        let words = tokenize("Hello, World! Rust-lang is fun.");
        assert_eq!(words, vec!["hello", "world", "rust", "lang", "is", "fun"]);
    }

    #[test]
    fn snippet_truncates_to_fixed_length() {
        let long = "x".repeat(500);
        assert_eq!(snippet(&long).len(), SNIPPET_LEN);
    }

    #[test]
    fn empty_query_has_no_matches() {
        assert!(tokenize("").is_empty());
    }
}
