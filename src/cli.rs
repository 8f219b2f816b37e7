use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "crawlhub", about = "Domain-aware web crawler and indexer")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a crawl session from a seed URL (`/api/crawl/add-site`)
    Crawl {
        /// Seed URL
        url: String,

        #[arg(long)]
        max_pages: Option<u32>,

        #[arg(long)]
        max_depth: Option<u32>,

        #[arg(long)]
        force: bool,

        /// Allow following links off the seed domain
        #[arg(long)]
        no_restrict_domain: bool,

        #[arg(long)]
        browserless_url: Option<String>,

        /// Skip TLS certificate verification
        #[arg(long)]
        insecure: bool,
    },
    /// Report status for one or all sessions (`/api/crawl/status`)
    Status {
        /// Session ID; omitted reports every active session
        session: Option<String>,

        #[arg(long)]
        results: bool,

        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Signal a running session to stop
    Stop {
        session: String,
    },
    /// Crawl history for a domain or URL (`/api/crawl/details`)
    Details {
        #[arg(long)]
        domain: Option<String>,

        #[arg(long)]
        url: Option<String>,
    },
    /// Full-text search over indexed pages (`/api/search`)
    Search {
        query: String,

        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Check whether a URL is SPA-rendered without crawling it
    SpaDetect {
        url: String,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Fetch a URL via the headless-render path
    SpaRender {
        url: String,

        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        full: bool,
    },
}
