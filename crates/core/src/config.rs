use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration, loaded from TOML and then layered with
/// environment variable overrides (see `apply_env_overrides`).
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    pub crawl: CrawlDefaultsConfig,
    pub robots: RobotsConfig,
    #[serde(default)]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub mongodb_uri: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub redis_uri: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlDefaultsConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_user_agent")]
    pub default_user_agent: String,
    pub browserless_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RobotsConfig {
    #[serde(default = "default_robots_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

impl RobotsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn default_port() -> u16 {
    3000
}
fn default_index_name() -> String {
    "search_index".to_string()
}
fn default_max_sessions() -> usize {
    16
}
fn default_user_agent() -> String {
    "crawlhub/1.0".to_string()
}
fn default_robots_cache_ttl() -> u64 {
    24 * 3600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { port: default_port() },
            database: DatabaseConfig {
                mongodb_uri: "mongodb://localhost:27017/crawlhub".to_string(),
            },
            search: SearchConfig {
                redis_uri: "redis://localhost:6379".to_string(),
                index_name: default_index_name(),
            },
            crawl: CrawlDefaultsConfig {
                max_sessions: default_max_sessions(),
                default_user_agent: default_user_agent(),
                browserless_url: None,
            },
            robots: RobotsConfig {
                cache_ttl_seconds: default_robots_cache_ttl(),
            },
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Overrides config values from environment variables, following
    /// the §6.4 table. Called once at process startup after TOML parsing.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("MONGODB_URI") {
            self.database.mongodb_uri = v;
        }
        if let Ok(v) = std::env::var("SEARCH_REDIS_URI") {
            self.search.redis_uri = v;
        }
        if let Ok(v) = std::env::var("SEARCH_INDEX_NAME") {
            self.search.index_name = v;
        }
        if let Ok(v) = std::env::var("BROWSERLESS_URL") {
            self.crawl.browserless_url = Some(v);
        }
        if let Ok(v) = std::env::var("CRAWL_MAX_SESSIONS") {
            if let Ok(n) = v.parse() {
                self.crawl.max_sessions = n;
            }
        }
        if let Ok(v) = std::env::var("CRAWL_DEFAULT_UA") {
            self.crawl.default_user_agent = v;
        }
        if let Ok(v) = std::env::var("ROBOTS_CACHE_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                self.robots.cache_ttl_seconds = n;
            }
        }
    }
}
