use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use sift_core::{ApiKeyRecord, Job, JobStatus, JobType, Page, Renderer, Scope, SiftError};

#[derive(FromRow)]
pub struct PageRow {
    pub id: Uuid,
    pub url: String,
    pub canonical_url: String,
    pub url_hash: String,
    pub content_hash: Option<String>,
    pub status_code: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub markdown: String,
    pub raw_html: Option<String>,
    pub renderer: String,
    pub links_internal: Vec<String>,
    pub links_external: Vec<String>,
    pub word_count: i32,
    pub fetch_duration_ms: i64,
    pub fetched_at: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl TryFrom<PageRow> for Page {
    type Error = SiftError;

    fn try_from(row: PageRow) -> Result<Self, Self::Error> {
        let renderer = Renderer::parse(&row.renderer)
            .ok_or_else(|| SiftError::Internal(format!("unknown renderer tag {:?}", row.renderer)))?;
        Ok(Page {
            id: row.id,
            url: row.url,
            canonical_url: row.canonical_url,
            url_hash: row.url_hash,
            content_hash: row.content_hash,
            status_code: row.status_code,
            title: row.title,
            description: row.description,
            markdown: row.markdown,
            raw_html: row.raw_html,
            renderer,
            links_internal: row.links_internal,
            links_external: row.links_external,
            word_count: row.word_count,
            fetch_duration_ms: row.fetch_duration_ms,
            fetched_at: row.fetched_at,
            error_code: row.error_code,
            error_message: row.error_message,
        })
    }
}

#[derive(FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub api_key_id: Uuid,
    pub job_type: String,
    pub status: String,
    pub input_params: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub pages_discovered: i32,
    pub pages_total: Option<i32>,
    pub result: Option<serde_json::Value>,
    pub cancel_requested: bool,
    pub reclaim_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = SiftError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type = JobType::parse(&row.job_type)
            .ok_or_else(|| SiftError::Internal(format!("unknown job type {:?}", row.job_type)))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| SiftError::Internal(format!("unknown job status {:?}", row.status)))?;
        Ok(Job {
            id: row.id,
            api_key_id: row.api_key_id,
            job_type,
            status,
            input_params: row.input_params,
            idempotency_key: row.idempotency_key,
            error_code: row.error_code,
            error_message: row.error_message,
            pages_discovered: row.pages_discovered,
            pages_total: row.pages_total,
            result: row.result,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub key_hash: String,
    pub name: String,
    pub scopes: Vec<String>,
    pub rate_limit: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyRow> for ApiKeyRecord {
    fn from(row: ApiKeyRow) -> Self {
        ApiKeyRecord {
            id: row.id,
            name: row.name,
            // Unknown scope strings are ignored rather than fatal.
            scopes: row.scopes.iter().filter_map(|s| Scope::parse(s)).collect(),
            rate_limit: row.rate_limit,
            is_active: row.is_active,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

pub const PAGE_COLUMNS: &str = "id, url, canonical_url, url_hash, content_hash, status_code, title, description, markdown, raw_html, renderer, links_internal, links_external, word_count, fetch_duration_ms, fetched_at, error_code, error_message";

pub const JOB_COLUMNS: &str = "id, api_key_id, job_type, status, input_params, idempotency_key, error_code, error_message, pages_discovered, pages_total, result, cancel_requested, reclaim_count, created_at, started_at, completed_at";

pub const API_KEY_COLUMNS: &str =
    "id, key_hash, name, scopes, rate_limit, is_active, created_at, last_used_at";
