use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sift", about = "Web extraction service: URLs to clean Markdown, site maps and structured data")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the background job workers and lease reaper
    Worker,
    /// Scrape a single URL and print the page envelope
    Scrape {
        url: String,

        /// Render policy: auto, always or never
        #[arg(long, default_value = "auto")]
        render: String,

        /// Honor the host's robots.txt
        #[arg(long)]
        respect_robots: bool,

        /// Bypass the page cache
        #[arg(long)]
        force: bool,

        /// Include the raw HTML in the output
        #[arg(long)]
        raw_html: bool,

        /// Per-request deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Submit a site-map crawl job
    Map {
        url: String,

        #[arg(long, default_value = "2")]
        max_depth: u32,

        #[arg(long, default_value = "100")]
        max_pages: u32,

        /// Path regex a link must match to be followed (repeatable)
        #[arg(long)]
        include: Vec<String>,

        /// Path regex that excludes a link (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        #[arg(long, default_value = "5")]
        concurrency: u32,

        #[arg(long)]
        respect_robots: bool,

        /// Re-scrape pages even when cached
        #[arg(long)]
        force: bool,

        /// Poll the job until it reaches a terminal state
        #[arg(long)]
        follow: bool,
    },
    /// Search the web, optionally scraping the top results
    Search {
        query: String,

        #[arg(long, default_value = "10")]
        num_results: u32,

        /// Scrape this many of the top results inline
        #[arg(long, default_value = "0")]
        scrape_top_n: u32,
    },
    /// Submit an LLM structured-extraction job
    Extract {
        url: String,

        /// Natural-language extraction instruction
        #[arg(long)]
        prompt: String,

        /// Path to a JSON Schema file constraining the output
        #[arg(long)]
        schema_file: Option<String>,

        /// Poll the job until it reaches a terminal state
        #[arg(long)]
        follow: bool,
    },
    /// Inspect or cancel background jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Show service counters
    Status,
    /// Manage API keys
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
}

#[derive(Subcommand)]
pub enum JobsCommand {
    /// Print a job's status envelope
    Status { id: String },
    /// Print a terminal job's results
    Results { id: String },
    /// Request cancellation
    Cancel { id: String },
}

#[derive(Subcommand)]
pub enum KeysCommand {
    /// Create a key; the plaintext is printed exactly once
    Create {
        #[arg(long)]
        name: String,

        /// Comma-separated scopes: scrape,map,search,agent,admin
        #[arg(long, default_value = "scrape,map,search,agent")]
        scopes: String,

        /// Requests per minute
        #[arg(long, default_value = "60")]
        rate_limit: i32,
    },
    /// List keys (never the secrets)
    List,
    /// Rename a key
    Rename {
        id: String,

        #[arg(long)]
        name: String,
    },
    /// Soft-revoke a key
    Revoke { id: String },
}
