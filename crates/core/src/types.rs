use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::SiftError;

/// Client-chosen strategy for headless rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderPolicy {
    #[default]
    Auto,
    Always,
    Never,
}

/// Which engine produced the body we extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
    Static,
    Headless,
}

impl Renderer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Renderer::Static => "static",
            Renderer::Headless => "headless",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(Renderer::Static),
            "headless" => Some(Renderer::Headless),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Map,
    AgentExtract,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Map => "map",
            JobType::AgentExtract => "agent_extract",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "map" => Some(JobType::Map),
            "agent_extract" => Some(JobType::AgentExtract),
            _ => None,
        }
    }
}

/// Job lifecycle: queued → running → {completed | failed | cancelled}.
/// Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }
}

/// Operations an API key is allowed to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Scrape,
    Map,
    Search,
    Agent,
    Admin,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Scrape => "scrape",
            Scope::Map => "map",
            Scope::Search => "search",
            Scope::Agent => "agent",
            Scope::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scrape" => Some(Scope::Scrape),
            "map" => Some(Scope::Map),
            "search" => Some(Scope::Search),
            "agent" => Some(Scope::Agent),
            "admin" => Some(Scope::Admin),
            _ => None,
        }
    }
}

/// An authenticated API key. The plaintext secret is never stored; only
/// the salted hash lives in the database.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub name: String,
    pub scopes: Vec<Scope>,
    pub rate_limit: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope) || self.scopes.contains(&Scope::Admin)
    }
}

/// Tuning knobs for a single fetch, resolved by the coordinator from the
/// request and the service config.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub render: RenderPolicy,
    pub timeout: Duration,
    pub max_body_size: usize,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            render: RenderPolicy::Auto,
            timeout: Duration::from_secs(20),
            max_body_size: 10 * 1024 * 1024,
            user_agent: String::new(),
        }
    }
}

/// What a fetch produced, whichever engine ran it.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub final_url: Url,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub renderer: Renderer,
    pub duration_ms: u64,
}

/// Seam between the coordinator and the adaptive fetcher.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &Url, opts: &FetchOptions) -> Result<FetchOutcome, SiftError>;
}

/// Seam to the LLM provider. Implementations speak whatever wire protocol
/// the provider requires; callers only see text in, text out.
#[async_trait]
pub trait LlmClient: Send + Sync + 'static {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, SiftError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    #[default]
    Web,
    News,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
    pub rank: u32,
}

/// Seam to the third-party search provider.
#[async_trait]
pub trait SearchProvider: Send + Sync + 'static {
    async fn search(
        &self,
        query: &str,
        num_results: u32,
        kind: SearchKind,
    ) -> Result<Vec<SearchHit>, SiftError>;
}

/// A cached extraction result, one row per canonical URL.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: Uuid,
    pub url: String,
    pub canonical_url: String,
    pub url_hash: String,
    pub content_hash: Option<String>,
    pub status_code: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub markdown: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    pub renderer: Renderer,
    pub links_internal: Vec<String>,
    pub links_external: Vec<String>,
    pub word_count: i32,
    pub fetch_duration_ms: i64,
    pub fetched_at: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// A background unit of work; the row doubles as the queue entry.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub api_key_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub input_params: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub pages_discovered: i32,
    pub pages_total: Option<i32>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for a single synchronous scrape.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default)]
    pub render: RenderPolicy,
    #[serde(default)]
    pub include_links: bool,
    #[serde(default)]
    pub include_raw_html: bool,
    #[serde(default)]
    pub respect_robots: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// None disables the TTL cap entirely; absent means the default TTL.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: Option<i64>,
    #[serde(default)]
    pub force_refresh: bool,
}

fn default_cache_ttl() -> Option<i64> {
    Some(3600)
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            render: RenderPolicy::Auto,
            include_links: true,
            include_raw_html: false,
            respect_robots: false,
            timeout_ms: None,
            cache_ttl_seconds: default_cache_ttl(),
            force_refresh: false,
        }
    }
}

/// Parameters for a map (BFS site map) job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapParams {
    pub url: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub respect_robots: bool,
    #[serde(default)]
    pub render: RenderPolicy,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default)]
    pub force: bool,
}

fn default_max_depth() -> u32 {
    2
}
fn default_max_pages() -> u32 {
    100
}
fn default_concurrency() -> u32 {
    5
}

impl MapParams {
    pub fn validate(&self) -> Result<(), SiftError> {
        if self.max_depth > 5 {
            return Err(SiftError::Validation("max_depth must be 0-5".into()));
        }
        if self.max_pages == 0 || self.max_pages > 1000 {
            return Err(SiftError::Validation("max_pages must be 1-1000".into()));
        }
        if self.concurrency == 0 || self.concurrency > 10 {
            return Err(SiftError::Validation("concurrency must be 1-10".into()));
        }
        for pat in self.include_patterns.iter().chain(&self.exclude_patterns) {
            if regex_syntax_invalid(pat) {
                return Err(SiftError::Validation(format!("invalid pattern: {pat}")));
            }
        }
        Ok(())
    }
}

// Cheap structural check so validation can reject obviously broken patterns
// without pulling the regex crate into core.
fn regex_syntax_invalid(pat: &str) -> bool {
    pat.is_empty() || pat.len() > 512
}

/// Parameters for an LLM structured-extraction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentParams {
    pub url: String,
    pub prompt: String,
    #[serde(default)]
    pub schema_definition: Option<serde_json::Value>,
    #[serde(default)]
    pub render: RenderPolicy,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl AgentParams {
    pub fn validate(&self) -> Result<(), SiftError> {
        if self.prompt.trim().is_empty() {
            return Err(SiftError::Validation("prompt must not be empty".into()));
        }
        if let Some(schema) = &self.schema_definition {
            if !schema.is_object() {
                return Err(SiftError::Validation("schema_definition must be a JSON object".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn map_params_bounds() {
        let mut params = MapParams {
            url: "https://example.com".into(),
            max_depth: 2,
            max_pages: 100,
            include_patterns: vec![],
            exclude_patterns: vec![],
            respect_robots: false,
            render: RenderPolicy::Auto,
            timeout_ms: None,
            concurrency: 5,
            force: false,
        };
        assert!(params.validate().is_ok());
        params.max_depth = 6;
        assert!(params.validate().is_err());
        params.max_depth = 5;
        params.max_pages = 0;
        assert!(params.validate().is_err());
        params.max_pages = 1001;
        assert!(params.validate().is_err());
        params.max_pages = 1000;
        params.concurrency = 11;
        assert!(params.validate().is_err());
    }

    #[test]
    fn admin_scope_implies_all() {
        let key = ApiKeyRecord {
            id: Uuid::nil(),
            name: "root".into(),
            scopes: vec![Scope::Admin],
            rate_limit: 60,
            is_active: true,
            created_at: Utc::now(),
            last_used_at: None,
        };
        assert!(key.has_scope(Scope::Scrape));
        assert!(key.has_scope(Scope::Agent));
    }

    #[test]
    fn scrape_request_defaults_from_json() {
        let req: ScrapeRequest = serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert_eq!(req.render, RenderPolicy::Auto);
        assert_eq!(req.cache_ttl_seconds, Some(3600));
        assert!(!req.force_refresh);

        // Explicit null disables the TTL cap.
        let req: ScrapeRequest =
            serde_json::from_str(r#"{"url":"https://example.com","cache_ttl_seconds":null}"#).unwrap();
        assert_eq!(req.cache_ttl_seconds, None);
    }
}
