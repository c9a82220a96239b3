use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use sift_core::{Job, JobType, SiftError};

use crate::row::{JobRow, JOB_COLUMNS};
use crate::Storage;

/// One crawled page as it appears in a job's result payload.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct JobPageEntry {
    pub page_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub status_code: Option<i32>,
    pub depth: i32,
}

impl Storage {
    /// Insert a queued job. With an idempotency key the insert is a no-op
    /// when a job with the same `(api_key_id, idempotency_key)` already
    /// exists; the caller then re-reads the original row.
    pub async fn create_job(
        &self,
        api_key_id: Uuid,
        job_type: JobType,
        input_params: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Option<Job>, SiftError> {
        let query = format!(
            r#"INSERT INTO jobs (api_key_id, job_type, input_params, idempotency_key)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (api_key_id, idempotency_key) WHERE idempotency_key IS NOT NULL
               DO NOTHING
               RETURNING {JOB_COLUMNS}"#
        );
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(api_key_id)
            .bind(job_type.as_str())
            .bind(input_params)
            .bind(idempotency_key)
            .fetch_optional(self.pool())
            .await
            .map_err(SiftError::storage)?;
        row.map(Job::try_from).transpose()
    }

    pub async fn find_job_by_idempotency(
        &self,
        api_key_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Job>, SiftError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE api_key_id = $1 AND idempotency_key = $2"
        );
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(api_key_id)
            .bind(idempotency_key)
            .fetch_optional(self.pool())
            .await
            .map_err(SiftError::storage)?;
        row.map(Job::try_from).transpose()
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, SiftError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(SiftError::storage)?;
        row.map(Job::try_from).transpose()
    }

    /// Claim the oldest queued job. The `FOR UPDATE SKIP LOCKED` subquery
    /// makes the queued→running transition a compare-and-set: at most one
    /// worker wins any row.
    pub async fn claim_next_job(&self) -> Result<Option<Job>, SiftError> {
        let query = format!(
            r#"UPDATE jobs
               SET status = 'running', started_at = now(), heartbeat_at = now()
               WHERE id = (
                   SELECT id FROM jobs
                   WHERE status = 'queued'
                   ORDER BY created_at ASC
                   FOR UPDATE SKIP LOCKED
                   LIMIT 1
               ) AND status = 'queued'
               RETURNING {JOB_COLUMNS}"#
        );
        let row: Option<JobRow> = sqlx::query_as(&query)
            .fetch_optional(self.pool())
            .await
            .map_err(SiftError::storage)?;
        row.map(Job::try_from).transpose()
    }

    /// Progress write doubling as heartbeat. Returns the cancel flag so
    /// workers observe cancellation on their normal write cadence.
    pub async fn write_job_progress(
        &self,
        id: Uuid,
        pages_discovered: i32,
        pages_total: Option<i32>,
    ) -> Result<bool, SiftError> {
        let row: (bool,) = sqlx::query_as(
            r#"UPDATE jobs
               SET pages_discovered = $2, pages_total = $3, heartbeat_at = now()
               WHERE id = $1
               RETURNING cancel_requested"#,
        )
        .bind(id)
        .bind(pages_discovered)
        .bind(pages_total)
        .fetch_one(self.pool())
        .await
        .map_err(SiftError::storage)?;
        Ok(row.0)
    }

    /// Bare lease renewal for phases with no counter movement (LLM calls,
    /// long fetches). Returns the cancel flag.
    pub async fn heartbeat_job(&self, id: Uuid) -> Result<bool, SiftError> {
        let row: (bool,) = sqlx::query_as(
            "UPDATE jobs SET heartbeat_at = now() WHERE id = $1 RETURNING cancel_requested",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(SiftError::storage)?;
        Ok(row.0)
    }

    pub async fn complete_job(&self, id: Uuid, result: &Value) -> Result<(), SiftError> {
        sqlx::query(
            r#"UPDATE jobs
               SET status = 'completed', completed_at = now(), result = $2
               WHERE id = $1 AND status = 'running'"#,
        )
        .bind(id)
        .bind(result)
        .execute(self.pool())
        .await
        .map_err(SiftError::storage)?;
        Ok(())
    }

    pub async fn fail_job(&self, id: Uuid, code: &str, message: &str) -> Result<(), SiftError> {
        sqlx::query(
            r#"UPDATE jobs
               SET status = 'failed', completed_at = now(), error_code = $2, error_message = $3
               WHERE id = $1 AND status IN ('queued', 'running')"#,
        )
        .bind(id)
        .bind(code)
        .bind(message)
        .execute(self.pool())
        .await
        .map_err(SiftError::storage)?;
        Ok(())
    }

    /// Request cancellation. Queued jobs flip straight to cancelled; a
    /// running job gets its flag set for the worker to observe.
    pub async fn request_cancel(&self, id: Uuid) -> Result<(), SiftError> {
        let cancelled = sqlx::query(
            r#"UPDATE jobs SET status = 'cancelled', completed_at = now()
               WHERE id = $1 AND status = 'queued'"#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(SiftError::storage)?;
        if cancelled.rows_affected() == 0 {
            sqlx::query("UPDATE jobs SET cancel_requested = true WHERE id = $1 AND status = 'running'")
                .bind(id)
                .execute(self.pool())
                .await
                .map_err(SiftError::storage)?;
        }
        Ok(())
    }

    /// Worker observed the cancel flag and stopped.
    pub async fn mark_job_cancelled(&self, id: Uuid) -> Result<(), SiftError> {
        sqlx::query(
            r#"UPDATE jobs SET status = 'cancelled', completed_at = now()
               WHERE id = $1 AND status = 'running'"#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(SiftError::storage)?;
        Ok(())
    }

    /// Lease enforcement. A stalled running job (no heartbeat within the
    /// lease) goes back to the queue once; a second stall fails it.
    pub async fn reap_stalled_jobs(&self, lease_seconds: i64) -> Result<(u64, u64), SiftError> {
        let requeued = sqlx::query(
            r#"UPDATE jobs
               SET status = 'queued', started_at = NULL, heartbeat_at = NULL,
                   reclaim_count = reclaim_count + 1
               WHERE status = 'running'
                 AND heartbeat_at < now() - make_interval(secs => $1::double precision)
                 AND reclaim_count = 0"#,
        )
        .bind(lease_seconds)
        .execute(self.pool())
        .await
        .map_err(SiftError::storage)?
        .rows_affected();

        let failed = sqlx::query(
            r#"UPDATE jobs
               SET status = 'failed', completed_at = now(),
                   error_code = 'WORKER_STALLED',
                   error_message = 'worker lease expired twice'
               WHERE status = 'running'
                 AND heartbeat_at < now() - make_interval(secs => $1::double precision)
                 AND reclaim_count >= 1"#,
        )
        .bind(lease_seconds)
        .execute(self.pool())
        .await
        .map_err(SiftError::storage)?
        .rows_affected();

        Ok((requeued, failed))
    }

    pub async fn queue_depth(&self) -> Result<i64, SiftError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = 'queued'")
            .fetch_one(self.pool())
            .await
            .map_err(SiftError::storage)?;
        Ok(row.0)
    }

    pub async fn link_job_page(&self, job_id: Uuid, page_id: Uuid, depth: i32) -> Result<(), SiftError> {
        sqlx::query(
            r#"INSERT INTO job_pages (job_id, page_id, depth) VALUES ($1, $2, $3)
               ON CONFLICT (job_id, page_id) DO NOTHING"#,
        )
        .bind(job_id)
        .bind(page_id)
        .bind(depth)
        .execute(self.pool())
        .await
        .map_err(SiftError::storage)?;
        Ok(())
    }

    /// The pages a job visited, shallowest first, in insertion order
    /// within a depth.
    pub async fn job_pages(&self, job_id: Uuid) -> Result<Vec<JobPageEntry>, SiftError> {
        sqlx::query_as(
            r#"SELECT p.id AS page_id, p.url, p.title, p.status_code, jp.depth
               FROM job_pages jp
               JOIN pages p ON p.id = jp.page_id
               WHERE jp.job_id = $1
               ORDER BY jp.depth ASC, p.fetched_at ASC"#,
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await
        .map_err(SiftError::storage)
    }
}
