use std::sync::Arc;

use anyhow::Result;

use sift_core::{AppConfig, LlmClient, SearchProvider};
use sift_fetch::AdaptiveFetcher;
use sift_guard::RobotsCache;
use sift_jobs::{HttpLlmClient, JobEngine};
use sift_limits::{DomainGovernor, RateLimiter};
use sift_pipeline::ScrapeCoordinator;
use sift_search::{HttpSearchProvider, SearchService};
use sift_storage::Storage;

/// Everything a command needs, wired once. The limiter, governor, robots
/// cache and single-flight map inside the coordinator are process-global
/// by construction: one instance each, shared by every caller.
pub struct AppContext {
    pub config: AppConfig,
    pub storage: Storage,
    pub coordinator: Arc<ScrapeCoordinator>,
    pub engine: Arc<JobEngine>,
    pub search: SearchService,
}

impl AppContext {
    pub async fn init(config: AppConfig) -> Result<Self> {
        let storage =
            Storage::with_pool_size(&config.database.postgres_url, config.database.pool_size).await?;
        storage.run_migrations().await?;

        let fetcher = Arc::new(AdaptiveFetcher::new(
            &config.fetch,
            &config.render,
            &config.general.user_agent,
        )?);
        let robots = Arc::new(RobotsCache::new(&config.general.user_agent, &config.robots));
        let limiter = Arc::new(RateLimiter::new());
        let governor = Arc::new(DomainGovernor::new(config.limits.per_host_concurrency));

        let coordinator = Arc::new(ScrapeCoordinator::new(
            &config,
            storage.clone(),
            fetcher,
            robots,
            Arc::clone(&limiter),
            Arc::clone(&governor),
        ));

        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(&config.llm)?);
        let engine = Arc::new(JobEngine::new(
            storage.clone(),
            Arc::clone(&coordinator),
            llm,
            Arc::clone(&limiter),
            config.jobs.clone(),
            config.llm.clone(),
        ));

        let provider: Arc<dyn SearchProvider> = Arc::new(HttpSearchProvider::new(&config.search)?);
        let search = SearchService::new(provider, Arc::clone(&coordinator), limiter);

        Ok(Self {
            config,
            storage,
            coordinator,
            engine,
            search,
        })
    }
}
