//! Robots Policy (§4.7): fetch+cache `robots.txt` per host, evaluate
//! `isAllowed`/`getCrawlDelay` against user-agent groups.
//!
//! The per-host TTL cache is the same shape as the cookie store's
//! `DashMap<String, Stored{..., expires_at}>`, generalized from cookies
//! to parsed robots rule sets. The line-based directive parsing (`User-
//! agent:`/`Disallow:`/`Allow:`/`Sitemap:`) is grounded on the simple
//! `Disallow`/`Sitemap` scan used to mine discoverable URLs, extended
//! here with user-agent grouping, `Crawl-delay`, and `*`/`$` wildcard
//! matching, since policy enforcement needs more than discovery did.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct RobotsRules {
    groups: std::collections::HashMap<String, Group>,
    sitemaps: Vec<String>,
}

impl RobotsRules {
    fn allow_all() -> Self {
        Self::default()
    }

    fn group_for<'a>(&'a self, user_agent: &str) -> Option<&'a Group> {
        let ua = user_agent.to_lowercase();
        self.groups
            .iter()
            .find(|(name, _)| *name != "*" && ua.contains(name.as_str()))
            .map(|(_, g)| g)
            .or_else(|| self.groups.get("*"))
    }
}

/// Parses a `robots.txt` body into per-user-agent groups.
fn parse_robots(body: &str) -> RobotsRules {
    let mut rules = RobotsRules::default();
    let mut current_agents: Vec<String> = Vec::new();
    let mut started_directives = false;

    for raw_line in body.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if started_directives {
                    current_agents.clear();
                    started_directives = false;
                }
                current_agents.push(value.to_lowercase());
                for agent in &current_agents {
                    rules.groups.entry(agent.clone()).or_default();
                }
            }
            "disallow" => {
                started_directives = true;
                if value.is_empty() {
                    continue;
                }
                push_rule(&mut rules, &current_agents, false, value);
            }
            "allow" => {
                started_directives = true;
                push_rule(&mut rules, &current_agents, true, value);
            }
            "crawl-delay" => {
                started_directives = true;
                if let Ok(secs) = value.parse::<f64>() {
                    for agent in &current_agents {
                        rules.groups.entry(agent.clone()).or_default().crawl_delay = Some(secs);
                    }
                }
            }
            "sitemap" => {
                if !value.is_empty() {
                    rules.sitemaps.push(value.to_string());
                }
            }
            _ => {}
        }
    }

    rules
}

fn push_rule(rules: &mut RobotsRules, agents: &[String], allow: bool, pattern: &str) {
    let agents: Vec<String> = if agents.is_empty() {
        vec!["*".to_string()]
    } else {
        agents.to_vec()
    };
    for agent in agents {
        rules
            .groups
            .entry(agent)
            .or_default()
            .rules
            .push(Rule {
                allow,
                pattern: pattern.to_string(),
            });
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Literal-prefix match with `*` (any run of characters) and `$` (end of
/// path) wildcards, per §4.7.
fn matches_pattern(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let anchored_end = pattern.ends_with('$');
    let pattern = pattern.trim_end_matches('$');
    let segments: Vec<&str> = pattern.split('*').collect();

    let mut remaining = path;
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            continue;
        }
        match remaining.find(seg) {
            Some(pos) => {
                if i == 0 && pos != 0 {
                    return false;
                }
                remaining = &remaining[pos + seg.len()..];
            }
            None => return false,
        }
    }
    if anchored_end {
        remaining.is_empty()
    } else {
        true
    }
}

/// The longest matching rule wins; ties prefer `Allow`.
fn longest_match<'a>(group: &'a Group, path: &str) -> Option<&'a Rule> {
    group
        .rules
        .iter()
        .filter(|r| matches_pattern(path, &r.pattern))
        .max_by_key(|r| (r.pattern.len(), r.allow))
}

struct CacheEntry {
    rules: RobotsRules,
    fetched_at: DateTime<Utc>,
}

pub struct RobotsPolicy {
    client: reqwest::Client,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl RobotsPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client"),
            cache: DashMap::new(),
            ttl,
        }
    }

    async fn rules_for_host(&self, scheme: &str, host: &str) -> RobotsRules {
        if let Some(entry) = self.cache.get(host) {
            let age = Utc::now().signed_duration_since(entry.fetched_at);
            if age < chrono::Duration::from_std(self.ttl).unwrap_or_default() {
                return entry.rules.clone();
            }
        }

        let url = format!("{}://{}/robots.txt", scheme, host);
        let rules = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => parse_robots(&body),
                Err(_) => RobotsRules::allow_all(),
            },
            _ => RobotsRules::allow_all(),
        };

        self.cache.insert(
            host.to_string(),
            CacheEntry {
                rules: rules.clone(),
                fetched_at: Utc::now(),
            },
        );
        rules
    }

    /// §4.7 `isAllowed`. Treats an unreachable `robots.txt` as allow-all.
    pub async fn is_allowed(&self, scheme: &str, host: &str, path: &str, user_agent: &str) -> bool {
        let rules = self.rules_for_host(scheme, host).await;
        let Some(group) = rules.group_for(user_agent) else {
            return true;
        };
        match longest_match(group, path) {
            Some(rule) => rule.allow,
            None => true,
        }
    }

    pub async fn get_crawl_delay(&self, scheme: &str, host: &str, user_agent: &str) -> Duration {
        let rules = self.rules_for_host(scheme, host).await;
        rules
            .group_for(user_agent)
            .and_then(|g| g.crawl_delay)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::ZERO)
    }

    pub async fn sitemaps(&self, scheme: &str, host: &str) -> Vec<String> {
        self.rules_for_host(scheme, host).await.sitemaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_and_anchor_matching() {
        assert!(matches_pattern("/private/data", "/private/"));
        assert!(matches_pattern("/a/b/c", "/a/*/c"));
        assert!(!matches_pattern("/a/b/d", "/a/*/c$"));
        assert!(matches_pattern("/a/b/c", "/a/*/c$"));
        assert!(!matches_pattern("/other", "/private/"));
    }

    #[test]
    fn parses_groups_and_crawl_delay() {
        let body = "User-agent: *\nDisallow: /admin\nCrawl-delay: 2\n\nUser-agent: botty\nDisallow: /\n";
        let rules = parse_robots(body);
        let star = rules.groups.get("*").unwrap();
        assert_eq!(star.crawl_delay, Some(2.0));
        assert!(longest_match(star, "/admin/x").unwrap().allow == false);

        let botty = rules.groups.get("botty").unwrap();
        assert!(longest_match(botty, "/anything").unwrap().allow == false);
    }

    #[test]
    fn longest_match_wins_over_shorter_allow() {
        let body = "User-agent: *\nDisallow: /x\nAllow: /x/public\n";
        let rules = parse_robots(body);
        let group = rules.groups.get("*").unwrap();
        assert!(longest_match(group, "/x/public/page").unwrap().allow);
        assert!(!longest_match(group, "/x/private").unwrap().allow);
    }

    #[tokio::test]
    async fn unreachable_host_allows_everything() {
        let policy = RobotsPolicy::new(Duration::from_secs(60));
        let allowed = policy
            .is_allowed("http", "nonexistent.invalid.test.local", "/anything", "crawlhub")
            .await;
        assert!(allowed);
    }
}
