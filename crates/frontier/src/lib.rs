//! URL Frontier (§4.4): ready queue + delayed retry queue + visited set,
//! with total ordering `(priority desc, depth asc, FIFO)`.
//!
//! A single mutex protects ready queue, retry queue and visited set
//! together, per §5's "one mutex protecting ready queue + retry queue +
//! visited set" discipline — this intentionally trades the teacher's
//! per-network `DashMap<Arc<Mutex<NetworkQueue>>>` sharding for a single
//! lock, since this frontier is per-session rather than shared across
//! many concurrent network workers.

use chrono::{DateTime, Utc};
use crawlhub_core::{canonical, FailureType, Priority};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct QueuedUrlInfo {
    pub depth: u32,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
struct ReadyEntry {
    priority: Priority,
    depth: u32,
    seq: u64,
    url: String,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.depth == other.depth && self.seq == other.seq
    }
}
impl Eq for ReadyEntry {}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority, lower depth, and
        // lower sequence number must all compare as "greater" so they
        // pop first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct RetryEntry {
    ready_at: DateTime<Utc>,
    seq: u64,
    url: String,
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}
impl Eq for RetryEntry {}
impl Ord for RetryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap behavior: earliest `ready_at` pops first.
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    ready: BinaryHeap<ReadyEntry>,
    retry: BinaryHeap<RetryEntry>,
    ready_members: HashSet<String>,
    retry_members: HashSet<String>,
    visited: HashSet<String>,
    info: HashMap<String, QueuedUrlInfo>,
    last_error: HashMap<String, (FailureType, String)>,
    last_visit: HashMap<String, DateTime<Utc>>,
    seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

pub struct CrawlFrontier {
    inner: Mutex<Inner>,
}

impl Default for CrawlFrontier {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlFrontier {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: BinaryHeap::new(),
                retry: BinaryHeap::new(),
                ready_members: HashSet::new(),
                retry_members: HashSet::new(),
                visited: HashSet::new(),
                info: HashMap::new(),
                last_error: HashMap::new(),
                last_visit: HashMap::new(),
                seq: 0,
            }),
        }
    }

    /// §4.4 `addURL`. A URL's depth is fixed on first insertion and
    /// preserved across retries (invariant in §4.4).
    pub async fn add_url(&self, url: &str, force: bool, priority: Priority, depth: u32) {
        let key = canonical::canonicalize(url);
        let mut inner = self.inner.lock().await;

        if !force && inner.visited.contains(&key) {
            return;
        }
        if !force && (inner.ready_members.contains(&key) || inner.retry_members.contains(&key)) {
            return;
        }
        if force {
            inner.visited.remove(&key);
        }

        inner
            .info
            .entry(key.clone())
            .or_insert(QueuedUrlInfo { depth, retry_count: 0 });

        let seq = inner.next_seq();
        inner.ready_members.insert(key.clone());
        inner.ready.push(ReadyEntry {
            priority,
            depth,
            seq,
            url: key,
        });
    }

    /// §4.4 `scheduleRetry`. Does not bump `depth`; `retryCount` is
    /// caller-supplied so the engine controls the cap (§4.2 `maxRetries`).
    pub async fn schedule_retry(
        &self,
        url: &str,
        new_retry_count: u32,
        failure_type: FailureType,
        reason: &str,
        delay: Duration,
    ) {
        let key = canonical::canonicalize(url);
        let mut inner = self.inner.lock().await;

        if let Some(info) = inner.info.get_mut(&key) {
            info.retry_count = new_retry_count;
        } else {
            inner.info.insert(
                key.clone(),
                QueuedUrlInfo {
                    depth: 0,
                    retry_count: new_retry_count,
                },
            );
        }
        inner
            .last_error
            .insert(key.clone(), (failure_type, reason.to_string()));

        let ready_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        let seq = inner.next_seq();
        inner.retry_members.insert(key.clone());
        inner.retry.push(RetryEntry {
            ready_at,
            seq,
            url: key,
        });
    }

    /// §4.4 `next`: promotes due retries, then pops the highest-priority
    /// ready URL. Returns `None` when both queues are empty.
    pub async fn next(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;
        self.promote_due_retries(&mut inner);

        let entry = inner.ready.pop()?;
        inner.ready_members.remove(&entry.url);
        Some(entry.url)
    }

    fn promote_due_retries(&self, inner: &mut Inner) {
        let now = Utc::now();
        let mut due = Vec::new();
        while let Some(top) = inner.retry.peek() {
            if top.ready_at <= now {
                due.push(inner.retry.pop().unwrap());
            } else {
                break;
            }
        }
        for entry in due {
            inner.retry_members.remove(&entry.url);
            let depth = inner.info.get(&entry.url).map(|i| i.depth).unwrap_or(0);
            inner.ready_members.insert(entry.url.clone());
            let seq = inner.next_seq();
            inner.ready.push(ReadyEntry {
                priority: Priority::Normal,
                depth,
                seq,
                url: entry.url,
            });
        }
    }

    pub async fn has_ready_urls(&self) -> bool {
        !self.inner.lock().await.ready.is_empty()
    }

    pub async fn pending_retry_count(&self) -> usize {
        self.inner.lock().await.retry.len()
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.ready.len()
    }

    pub async fn retry_queue_size(&self) -> usize {
        self.inner.lock().await.retry.len()
    }

    pub async fn mark_visited(&self, url: &str) {
        let key = canonical::canonicalize(url);
        let mut inner = self.inner.lock().await;
        inner.visited.insert(key);
    }

    pub async fn is_visited(&self, url: &str) -> bool {
        let key = canonical::canonicalize(url);
        self.inner.lock().await.visited.contains(&key)
    }

    pub async fn record_visit(&self, domain: &str) {
        let mut inner = self.inner.lock().await;
        inner.last_visit.insert(domain.to_string(), Utc::now());
    }

    pub async fn last_visit_time(&self, domain: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().await.last_visit.get(domain).copied()
    }

    pub async fn get_queued_url_info(&self, url: &str) -> Option<QueuedUrlInfo> {
        let key = canonical::canonicalize(url);
        self.inner.lock().await.info.get(&key).copied()
    }

    /// §4.9 `reset`: drops both queues, the visited set, and all
    /// per-URL bookkeeping. Valid only while the owning session is
    /// `STOPPED`; the caller is responsible for enforcing that.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.ready.clear();
        inner.retry.clear();
        inner.ready_members.clear();
        inner.retry_members.clear();
        inner.visited.clear();
        inner.info.clear();
        inner.last_error.clear();
        inner.last_visit.clear();
        inner.seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ordering_is_priority_then_depth_then_fifo() {
        let f = CrawlFrontier::new();
        f.add_url("http://a.com/1", false, Priority::Low, 0).await;
        f.add_url("http://a.com/2", false, Priority::High, 1).await;
        f.add_url("http://a.com/3", false, Priority::High, 0).await;

        assert_eq!(f.next().await.unwrap(), canonical::canonicalize("http://a.com/3"));
        assert_eq!(f.next().await.unwrap(), canonical::canonicalize("http://a.com/2"));
        assert_eq!(f.next().await.unwrap(), canonical::canonicalize("http://a.com/1"));
        assert!(f.next().await.is_none());
    }

    #[tokio::test]
    async fn visited_urls_are_not_requeued_without_force() {
        let f = CrawlFrontier::new();
        f.add_url("http://a.com/x", false, Priority::Normal, 0).await;
        f.mark_visited("http://a.com/x").await;
        f.add_url("http://a.com/x", false, Priority::Normal, 0).await;
        assert_eq!(f.size().await, 0);

        f.add_url("http://a.com/x", true, Priority::Normal, 0).await;
        assert_eq!(f.size().await, 1);
    }

    #[tokio::test]
    async fn depth_is_preserved_across_retries() {
        let f = CrawlFrontier::new();
        f.add_url("http://a.com/y", false, Priority::Normal, 2).await;
        let info = f.get_queued_url_info("http://a.com/y").await.unwrap();
        assert_eq!(info.depth, 2);

        f.next().await;
        f.schedule_retry(
            "http://a.com/y",
            1,
            FailureType::Temporary5xx,
            "5xx",
            Duration::from_millis(1),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let url = f.next().await.unwrap();
        assert_eq!(url, canonical::canonicalize("http://a.com/y"));
        let info = f.get_queued_url_info("http://a.com/y").await.unwrap();
        assert_eq!(info.depth, 2);
        assert_eq!(info.retry_count, 1);
    }

    #[tokio::test]
    async fn retry_queue_promotes_only_when_due() {
        let f = CrawlFrontier::new();
        f.add_url("http://a.com/z", false, Priority::Normal, 0).await;
        f.next().await;
        f.schedule_retry(
            "http://a.com/z",
            1,
            FailureType::Timeout,
            "timeout",
            Duration::from_secs(10),
        )
        .await;
        assert!(f.next().await.is_none());
        assert_eq!(f.pending_retry_count().await, 1);
    }
}
