pub mod singleflight;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sift_core::{
    AppConfig, ApiKeyRecord, FetchOptions, Page, PageFetcher, Renderer, ScrapeRequest, SiftError,
};
use sift_guard::{ensure_public_address, normalize, sha256_hex, NormalizedUrl, RobotsCache};
use sift_limits::{DomainGovernor, RateLimiter};
use sift_storage::Storage;

use singleflight::SingleFlight;

/// Hard ceiling on a caller-supplied scrape deadline.
const MAX_TIMEOUT_MS: u64 = 60_000;

/// The coordinator's answer for one scrape.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub page: Page,
    pub cached: bool,
    pub cache_layer: Option<&'static str>,
}

impl ScrapeOutcome {
    /// Trim the envelope to what the request asked for. The cache always
    /// holds the full artifact; exposure is per-request.
    pub fn shaped(mut self, req: &ScrapeRequest) -> Self {
        if !req.include_raw_html {
            self.page.raw_html = None;
        }
        if !req.include_links {
            self.page.links_internal.clear();
            self.page.links_external.clear();
        }
        self
    }
}

/// Sequences one scrape through admission, safety checks, cache, robots,
/// the domain governor, fetch, extraction and persistence. Concurrent
/// scrapes of the same canonical URL share a single flight.
pub struct ScrapeCoordinator {
    storage: Storage,
    fetcher: Arc<dyn PageFetcher>,
    robots: Arc<RobotsCache>,
    limiter: Arc<RateLimiter>,
    governor: Arc<DomainGovernor>,
    inflight: SingleFlight<Result<ScrapeOutcome, SiftError>>,
    user_agent: String,
    max_body_size: usize,
    default_timeout: Duration,
}

impl ScrapeCoordinator {
    pub fn new(
        config: &AppConfig,
        storage: Storage,
        fetcher: Arc<dyn PageFetcher>,
        robots: Arc<RobotsCache>,
        limiter: Arc<RateLimiter>,
        governor: Arc<DomainGovernor>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            robots,
            limiter,
            governor,
            inflight: SingleFlight::new(),
            user_agent: config.general.user_agent.clone(),
            max_body_size: config.general.max_body_size_mb * 1024 * 1024,
            default_timeout: Duration::from_secs(config.fetch.request_timeout_seconds),
        }
    }

    /// Scrape on behalf of an authenticated caller: rate-limit admission
    /// runs first.
    pub async fn scrape(
        &self,
        api_key: &ApiKeyRecord,
        req: &ScrapeRequest,
    ) -> Result<ScrapeOutcome, SiftError> {
        if !api_key.has_scope(sift_core::Scope::Scrape) {
            return Err(SiftError::Forbidden("key lacks the scrape scope".into()));
        }
        self.limiter.check(api_key.id, api_key.rate_limit).await?;
        self.scrape_admitted(req).await
    }

    /// Scrape without per-key metering. Job workers use this path; their
    /// admission happened at submission time.
    pub async fn scrape_admitted(&self, req: &ScrapeRequest) -> Result<ScrapeOutcome, SiftError> {
        let normalized = normalize(&req.url, None)?;
        ensure_public_address(&normalized.url).await?;

        // `cache_ttl_seconds` carries the caller's cap; None (an explicit
        // null) disables the cap entirely.
        if !req.force_refresh {
            if let Some(page) = self
                .storage
                .probe_page(&normalized.url_hash, req.cache_ttl_seconds)
                .await?
            {
                debug!(url = %normalized.canonical, "cache hit");
                return Ok(ScrapeOutcome {
                    page,
                    cached: true,
                    cache_layer: Some("page"),
                });
            }
        }

        if req.respect_robots && !self.robots.allows(&normalized.url).await {
            return Err(SiftError::RobotsBlocked(normalized.url.path().to_string()));
        }

        let timeout = req
            .timeout_ms
            .map(|ms| Duration::from_millis(ms.min(MAX_TIMEOUT_MS)))
            .unwrap_or(self.default_timeout);

        let flight_key = normalized.url_hash.clone();
        self.inflight
            .run(&flight_key, || self.perform(normalized, req.render, timeout))
            .await
    }

    async fn perform(
        &self,
        normalized: NormalizedUrl,
        render: sift_core::RenderPolicy,
        timeout: Duration,
    ) -> Result<ScrapeOutcome, SiftError> {
        let host = normalized
            .url
            .host_str()
            .ok_or_else(|| SiftError::InvalidUrl("missing host".into()))?
            .to_string();

        let permit = self.governor.acquire(&host, timeout).await?;

        let opts = FetchOptions {
            render,
            timeout,
            max_body_size: self.max_body_size,
            user_agent: self.user_agent.clone(),
        };

        let fetched = self.fetcher.fetch(&normalized.url, &opts).await;
        let outcome = match fetched {
            Ok(outcome) => outcome,
            Err(err) => {
                drop(permit);
                self.record_failure(&normalized, &err).await;
                return Err(err);
            }
        };

        let html = String::from_utf8_lossy(&outcome.body).into_owned();
        let final_url = outcome.final_url.clone();

        // Parsing and Markdown conversion are CPU-bound; keep them off
        // the request path's executor threads.
        let extraction = {
            let html = html.clone();
            let final_url = final_url.clone();
            tokio::task::spawn_blocking(move || sift_extract::extract(&html, &final_url))
                .await
                .map_err(|e| SiftError::Internal(format!("extract task failed: {e}")))?
        };

        let content_hash = sha256_hex(extraction.markdown.as_bytes());
        let cache_layer = self.content_dedup(&normalized, &content_hash).await;

        let page = Page {
            id: Uuid::new_v4(),
            url: normalized.canonical.clone(),
            canonical_url: normalized.canonical.clone(),
            url_hash: normalized.url_hash.clone(),
            content_hash: Some(content_hash),
            status_code: Some(outcome.status as i32),
            title: extraction.title,
            description: extraction.description,
            markdown: extraction.markdown,
            raw_html: Some(html),
            renderer: outcome.renderer,
            links_internal: extraction.links.internal,
            links_external: extraction.links.external,
            word_count: extraction.word_count as i32,
            fetch_duration_ms: outcome.duration_ms as i64,
            fetched_at: Utc::now(),
            error_code: None,
            error_message: None,
        };

        let stored = self.storage.store_page(&page).await?;
        drop(permit);

        info!(url = %stored.canonical_url, renderer = stored.renderer.as_str(), words = stored.word_count, "scraped");
        Ok(ScrapeOutcome {
            page: stored,
            cached: false,
            cache_layer,
        })
    }

    /// Note when identical content is already cached under another URL.
    async fn content_dedup(
        &self,
        normalized: &NormalizedUrl,
        content_hash: &str,
    ) -> Option<&'static str> {
        match self.storage.lookup_page_by_content(content_hash).await {
            Ok(Some(existing)) if existing.url_hash != normalized.url_hash => {
                debug!(url = %normalized.canonical, other = %existing.canonical_url, "content already cached under another URL");
                Some("content")
            }
            _ => None,
        }
    }

    /// Fetch-layer failures leave a negative row behind so repeated
    /// probes of a broken URL don't refetch it before its TTL lapses.
    /// Pre-fetch rejections (SSRF, robots, validation) never reach here.
    async fn record_failure(&self, normalized: &NormalizedUrl, err: &SiftError) {
        let status = match err {
            SiftError::UpstreamHttp(status) => Some(*status as i32),
            _ => None,
        };
        let page = Page {
            id: Uuid::new_v4(),
            url: normalized.canonical.clone(),
            canonical_url: normalized.canonical.clone(),
            url_hash: normalized.url_hash.clone(),
            content_hash: None,
            status_code: status,
            title: None,
            description: None,
            markdown: String::new(),
            raw_html: None,
            renderer: Renderer::Static,
            links_internal: Vec::new(),
            links_external: Vec::new(),
            word_count: 0,
            fetch_duration_ms: 0,
            fetched_at: Utc::now(),
            error_code: Some(err.code().to_string()),
            error_message: Some(err.to_string()),
        };
        if let Err(store_err) = self.storage.store_page(&page).await {
            warn!(url = %normalized.canonical, "failed to record negative result: {store_err}");
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}
