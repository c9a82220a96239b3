use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use sift_core::config::{JobsConfig, LlmConfig};
use sift_core::{
    AgentParams, ApiKeyRecord, EventLevel, Job, JobType, LlmClient, MapParams, SiftError,
};
use sift_guard::normalize;
use sift_limits::RateLimiter;
use sift_pipeline::ScrapeCoordinator;
use sift_storage::{EventDraft, Storage};

use crate::{agent, crawl};

/// What a job handler produced: a result payload, or the observation that
/// cancellation was requested mid-run.
pub enum JobOutcome {
    Completed(Value),
    Cancelled,
}

/// The persistent job queue. The jobs table is the queue itself: workers
/// claim rows with a compare-and-set, heartbeat while running, and a
/// reaper requeues or fails jobs whose lease lapsed.
pub struct JobEngine {
    storage: Storage,
    coordinator: Arc<ScrapeCoordinator>,
    llm: Arc<dyn LlmClient>,
    limiter: Arc<RateLimiter>,
    jobs_config: JobsConfig,
    llm_config: LlmConfig,
}

impl JobEngine {
    pub fn new(
        storage: Storage,
        coordinator: Arc<ScrapeCoordinator>,
        llm: Arc<dyn LlmClient>,
        limiter: Arc<RateLimiter>,
        jobs_config: JobsConfig,
        llm_config: LlmConfig,
    ) -> Self {
        Self {
            storage,
            coordinator,
            llm,
            limiter,
            jobs_config,
            llm_config,
        }
    }

    /// Enqueue a job. Validation and the queue-depth watermark reject
    /// synchronously; everything after that is the worker's problem.
    /// With an idempotency key, a resubmission returns the original job
    /// whatever its status.
    pub async fn submit(
        &self,
        api_key: &ApiKeyRecord,
        job_type: JobType,
        params: Value,
        idempotency_key: Option<&str>,
    ) -> Result<Job, SiftError> {
        let required = match job_type {
            JobType::Map => sift_core::Scope::Map,
            JobType::AgentExtract => sift_core::Scope::Agent,
        };
        if !api_key.has_scope(required) {
            return Err(SiftError::Forbidden(format!(
                "key lacks the {} scope",
                required.as_str()
            )));
        }

        // Submission is the admission point for asynchronous work; the
        // worker later scrapes unmetered on the strength of this check.
        self.limiter.check(api_key.id, api_key.rate_limit).await?;

        self.validate_params(job_type, &params)?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.storage.find_job_by_idempotency(api_key.id, key).await? {
                return Ok(existing);
            }
        }

        if self.storage.queue_depth().await? >= self.jobs_config.queue_watermark {
            return Err(SiftError::QueueFull);
        }

        let created = self
            .storage
            .create_job(api_key.id, job_type, &params, idempotency_key)
            .await?;
        let job = match created {
            Some(job) => job,
            // Lost the insert race on the idempotency key; the winner's
            // row is the answer.
            None => {
                let key = idempotency_key.ok_or_else(|| {
                    SiftError::Internal("job insert returned no row without idempotency key".into())
                })?;
                self.storage
                    .find_job_by_idempotency(api_key.id, key)
                    .await?
                    .ok_or_else(|| SiftError::Internal("idempotent job vanished after insert".into()))?
            }
        };

        let mut event = EventDraft::job(job.id, "job_submitted", format!("{} job queued", job_type.as_str()));
        event.api_key_id = Some(api_key.id);
        self.storage.record_event(event).await?;

        info!(job_id = %job.id, job_type = job_type.as_str(), "job submitted");
        Ok(job)
    }

    fn validate_params(&self, job_type: JobType, params: &Value) -> Result<(), SiftError> {
        match job_type {
            JobType::Map => {
                let map: MapParams = serde_json::from_value(params.clone())
                    .map_err(|e| SiftError::Validation(format!("bad map parameters: {e}")))?;
                map.validate()?;
                normalize(&map.url, None)?;
            }
            JobType::AgentExtract => {
                let agent: AgentParams = serde_json::from_value(params.clone())
                    .map_err(|e| SiftError::Validation(format!("bad extract parameters: {e}")))?;
                agent.validate()?;
                normalize(&agent.url, None)?;
            }
        }
        Ok(())
    }

    pub async fn status(&self, api_key: &ApiKeyRecord, id: Uuid) -> Result<Job, SiftError> {
        let job = self
            .storage
            .get_job(id)
            .await?
            .ok_or_else(|| SiftError::NotFound(format!("job {id}")))?;
        // A foreign job is indistinguishable from a missing one, so a
        // job id alone leaks nothing across keys.
        if job.api_key_id != api_key.id && !api_key.has_scope(sift_core::Scope::Admin) {
            return Err(SiftError::NotFound(format!("job {id}")));
        }
        Ok(job)
    }

    /// Terminal-only read. Once a caller sees a terminal status the
    /// payload never changes.
    pub async fn results(&self, api_key: &ApiKeyRecord, id: Uuid) -> Result<Job, SiftError> {
        let job = self.status(api_key, id).await?;
        if !job.status.is_terminal() {
            return Err(SiftError::Conflict(format!(
                "job {id} is {}, results are available once it is terminal",
                job.status.as_str()
            )));
        }
        Ok(job)
    }

    pub async fn cancel(&self, api_key: &ApiKeyRecord, id: Uuid) -> Result<Job, SiftError> {
        // Ownership is checked before anything is touched.
        self.status(api_key, id).await?;
        self.storage.request_cancel(id).await?;
        self.storage
            .record_event(EventDraft::job(id, "job_cancel_requested", "cancellation requested"))
            .await?;
        self.status(api_key, id).await
    }

    /// Spawn the worker pool and the lease reaper. Workers drain until
    /// the shutdown channel fires, finishing their current job first.
    pub fn spawn_workers(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.jobs_config.workers + 1);
        for worker_id in 0..self.jobs_config.workers {
            let engine = Arc::clone(self);
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                info!(worker_id, "job worker started");
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!(worker_id, "job worker shutting down");
                            break;
                        }
                        claimed = engine.storage.claim_next_job() => {
                            match claimed {
                                Ok(Some(job)) => engine.execute(worker_id, job).await,
                                Ok(None) => {
                                    tokio::time::sleep(Duration::from_millis(engine.jobs_config.poll_interval_ms)).await;
                                }
                                Err(e) => {
                                    error!(worker_id, "job claim failed: {e}");
                                    tokio::time::sleep(Duration::from_secs(1)).await;
                                }
                            }
                        }
                    }
                }
            }));
        }

        let engine = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            let interval = Duration::from_secs(engine.jobs_config.reaper_interval_seconds);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        match engine.storage.reap_stalled_jobs(engine.jobs_config.lease_seconds).await {
                            Ok((0, 0)) => {}
                            Ok((requeued, failed)) => {
                                warn!(requeued, failed, "reaped stalled jobs");
                            }
                            Err(e) => error!("reaper pass failed: {e}"),
                        }
                    }
                }
            }
        }));

        handles
    }

    async fn execute(&self, worker_id: usize, job: Job) {
        info!(worker_id, job_id = %job.id, job_type = job.job_type.as_str(), "job started");
        let _ = self
            .storage
            .record_event(EventDraft::job(job.id, "job_started", "worker claimed job"))
            .await;

        // Keep the lease warm even when a single unit of work (a slow
        // fetch, an LLM round-trip) outlives the heartbeat cadence.
        let ticker = {
            let storage = self.storage.clone();
            let job_id = job.id;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    if storage.heartbeat_job(job_id).await.is_err() {
                        break;
                    }
                }
            })
        };

        let outcome = match job.job_type {
            JobType::Map => crawl::run(&self.storage, &self.coordinator, &job).await,
            JobType::AgentExtract => {
                agent::run(&self.storage, &self.coordinator, self.llm.as_ref(), &self.llm_config, &job).await
            }
        };
        ticker.abort();

        match outcome {
            Ok(JobOutcome::Completed(result)) => {
                if let Err(e) = self.storage.complete_job(job.id, &result).await {
                    error!(job_id = %job.id, "failed to persist completion: {e}");
                    return;
                }
                let _ = self
                    .storage
                    .record_event(EventDraft::job(job.id, "job_completed", "job finished"))
                    .await;
                info!(worker_id, job_id = %job.id, "job completed");
            }
            Ok(JobOutcome::Cancelled) => {
                if let Err(e) = self.storage.mark_job_cancelled(job.id).await {
                    error!(job_id = %job.id, "failed to persist cancellation: {e}");
                    return;
                }
                let _ = self
                    .storage
                    .record_event(EventDraft::job(job.id, "job_cancelled", "worker observed cancel flag"))
                    .await;
                info!(worker_id, job_id = %job.id, "job cancelled");
            }
            Err(err) => {
                if let Err(e) = self.storage.fail_job(job.id, err.code(), &err.to_string()).await {
                    error!(job_id = %job.id, "failed to persist failure: {e}");
                    return;
                }
                let _ = self
                    .storage
                    .record_event(
                        EventDraft::job(job.id, "job_failed", err.to_string()).level(EventLevel::Error),
                    )
                    .await;
                warn!(worker_id, job_id = %job.id, code = err.code(), "job failed: {err}");
            }
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}
