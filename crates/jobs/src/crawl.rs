use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use sift_core::{EventLevel, Job, MapParams, ScrapeRequest, SiftError};
use sift_guard::{normalize, registrable_domain};
use sift_pipeline::ScrapeCoordinator;
use sift_storage::{EventDraft, Storage};

use crate::engine::JobOutcome;

/// BFS site map. The frontier and visited set live behind one mutex; a
/// pool of `concurrency` workers drains the frontier until it is empty,
/// the page cap binds, or cancellation is observed.
pub async fn run(
    storage: &Storage,
    coordinator: &Arc<ScrapeCoordinator>,
    job: &Job,
) -> Result<JobOutcome, SiftError> {
    let params: MapParams = serde_json::from_value(job.input_params.clone())
        .map_err(|e| SiftError::Validation(format!("bad map parameters: {e}")))?;
    params.validate()?;

    let seed = normalize(&params.url, None)?;
    let seed_domain = seed
        .url
        .host_str()
        .map(|h| registrable_domain(h).unwrap_or_else(|| h.to_ascii_lowercase()))
        .ok_or_else(|| SiftError::InvalidUrl("seed has no host".into()))?;

    let include = compile_patterns(&params.include_patterns)?;
    let exclude = compile_patterns(&params.exclude_patterns)?;

    let mut state = CrawlState {
        frontier: VecDeque::new(),
        visited: HashSet::new(),
        scraped: 0,
        in_flight: 0,
        discovered: 0,
        failed: 0,
    };
    state.visited.insert(seed.url_hash.clone());
    state.frontier.push_back((seed.canonical.clone(), 0));
    state.discovered = 1;

    let crawler = Arc::new(Crawler {
        storage: storage.clone(),
        coordinator: Arc::clone(coordinator),
        job_id: job.id,
        params,
        seed_domain,
        include,
        exclude,
        state: Mutex::new(state),
        cancelled: AtomicBool::new(false),
        seed_failed: Mutex::new(None),
    });

    let mut workers = JoinSet::new();
    for _ in 0..crawler.params.concurrency {
        let crawler = Arc::clone(&crawler);
        workers.spawn(async move { crawler.work().await });
    }
    while workers.join_next().await.is_some() {}

    if let Some(err) = crawler.seed_failed.lock().await.take() {
        return Err(err);
    }
    if crawler.cancelled.load(Ordering::SeqCst) {
        return Ok(JobOutcome::Cancelled);
    }

    let (discovered, failed) = {
        let state = crawler.state.lock().await;
        (state.discovered, state.failed)
    };

    // The job_pages rows are the authoritative result; the payload is a
    // projection of them.
    let entries = storage.job_pages(job.id).await?;
    let total = entries.len() as i32;
    storage
        .write_job_progress(job.id, discovered as i32, Some(total))
        .await?;

    Ok(JobOutcome::Completed(json!({
        "seed": seed.canonical,
        "total": total,
        "failed": failed,
        "pages": entries,
    })))
}

struct CrawlState {
    frontier: VecDeque<(String, u32)>,
    visited: HashSet<String>,
    scraped: usize,
    in_flight: usize,
    discovered: u32,
    failed: u32,
}

struct Crawler {
    storage: Storage,
    coordinator: Arc<ScrapeCoordinator>,
    job_id: uuid::Uuid,
    params: MapParams,
    seed_domain: String,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    state: Mutex<CrawlState>,
    cancelled: AtomicBool,
    seed_failed: Mutex<Option<SiftError>>,
}

impl Crawler {
    async fn work(&self) {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }

            let item = {
                let mut state = self.state.lock().await;
                if state.scraped >= self.params.max_pages as usize {
                    return;
                }
                match state.frontier.pop_front() {
                    Some(item) => {
                        state.in_flight += 1;
                        Some(item)
                    }
                    None if state.in_flight == 0 => return,
                    None => None,
                }
            };

            let Some((url, depth)) = item else {
                // Someone else may still enqueue; back off briefly.
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            };

            if let Err(err) = self.visit(&url, depth).await {
                if depth == 0 {
                    // Seed failure sinks the whole job.
                    *self.seed_failed.lock().await = Some(err);
                    self.cancelled.store(true, Ordering::SeqCst);
                } else {
                    warn!(job_id = %self.job_id, url = %url, "page failed: {err}");
                    let mut state = self.state.lock().await;
                    state.failed += 1;
                    drop(state);
                    let _ = self
                        .storage
                        .record_event(
                            EventDraft::job(self.job_id, "page_failed", format!("{url}: {err}"))
                                .level(EventLevel::Warn)
                                .metadata(json!({ "depth": depth, "code": err.code() })),
                        )
                        .await;
                }
            }

            let (discovered, total_known) = {
                let mut state = self.state.lock().await;
                state.in_flight -= 1;
                (state.discovered, None::<i32>)
            };

            match self
                .storage
                .write_job_progress(self.job_id, discovered as i32, total_known)
                .await
            {
                Ok(cancel_requested) => {
                    if cancel_requested {
                        self.cancelled.store(true, Ordering::SeqCst);
                    }
                }
                Err(e) => warn!(job_id = %self.job_id, "progress write failed: {e}"),
            }
        }
    }

    async fn visit(&self, url: &str, depth: u32) -> Result<(), SiftError> {
        debug!(job_id = %self.job_id, url = %url, depth, "crawling");

        let mut req = ScrapeRequest::new(url);
        req.render = self.params.render;
        req.respect_robots = self.params.respect_robots;
        req.timeout_ms = self.params.timeout_ms;
        req.force_refresh = self.params.force;
        req.include_links = true;

        let outcome = self.coordinator.scrape_admitted(&req).await?;
        let page = &outcome.page;

        {
            let mut state = self.state.lock().await;
            if state.scraped >= self.params.max_pages as usize {
                return Ok(());
            }
            state.scraped += 1;
        }
        self.storage.link_job_page(self.job_id, page.id, depth as i32).await?;

        if depth < self.params.max_depth {
            self.expand(page.links_internal.clone(), depth).await;
        }
        Ok(())
    }

    /// Push unseen same-site links that pass the path filters. The crawl
    /// never leaves the seed's registrable domain.
    async fn expand(&self, links: Vec<String>, depth: u32) {
        let mut accepted: Vec<(String, String)> = Vec::new();
        for link in links {
            let Ok(normalized) = normalize(&link, None) else { continue };
            if link_passes_filters(&normalized.url, &self.seed_domain, &self.include, &self.exclude) {
                accepted.push((normalized.url_hash, normalized.canonical));
            }
        }
        if accepted.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        for (hash, canonical) in accepted {
            if state.visited.len() >= self.params.max_pages as usize {
                break;
            }
            if state.visited.insert(hash) {
                state.discovered += 1;
                state.frontier.push_back((canonical, depth + 1));
            }
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, SiftError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| SiftError::Validation(format!("invalid pattern {p:?}: {e}"))))
        .collect()
}

/// Same registrable domain, include patterns (if any) match the path, and
/// no exclude pattern matches.
fn link_passes_filters(url: &Url, seed_domain: &str, include: &[Regex], exclude: &[Regex]) -> bool {
    let Some(host) = url.host_str() else { return false };
    let domain = registrable_domain(host).unwrap_or_else(|| host.to_ascii_lowercase());
    if domain != seed_domain {
        return false;
    }
    let path = url.path();
    if !include.is_empty() && !include.iter().any(|re| re.is_match(path)) {
        return false;
    }
    if exclude.iter().any(|re| re.is_match(path)) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(patterns: &[&str]) -> Vec<Regex> {
        patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
    }

    #[test]
    fn stays_on_registrable_domain() {
        let include = re(&[]);
        let exclude = re(&[]);
        let same = Url::parse("https://docs.example.com/guide").unwrap();
        let other = Url::parse("https://elsewhere.org/guide").unwrap();
        assert!(link_passes_filters(&same, "example.com", &include, &exclude));
        assert!(!link_passes_filters(&other, "example.com", &include, &exclude));
    }

    #[test]
    fn include_and_exclude_filter_paths() {
        let include = re(&["^/docs/"]);
        let exclude = re(&["\\.pdf$"]);
        let ok = Url::parse("https://example.com/docs/intro").unwrap();
        let outside = Url::parse("https://example.com/blog/post").unwrap();
        let pdf = Url::parse("https://example.com/docs/manual.pdf").unwrap();
        assert!(link_passes_filters(&ok, "example.com", &include, &exclude));
        assert!(!link_passes_filters(&outside, "example.com", &include, &exclude));
        assert!(!link_passes_filters(&pdf, "example.com", &include, &exclude));
    }

    #[test]
    fn bad_patterns_fail_validation() {
        assert!(compile_patterns(&["(unclosed".to_string()]).is_err());
        assert!(compile_patterns(&["^/ok/".to_string()]).is_ok());
    }
}
