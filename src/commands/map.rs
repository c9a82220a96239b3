use std::time::Duration;

use anyhow::Result;
use tracing::info;

use sift_core::{ApiKeyRecord, JobType, MapParams, RenderPolicy};

use crate::commands::{print_json, require_api_key};
use crate::context::AppContext;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &AppContext,
    url: String,
    max_depth: u32,
    max_pages: u32,
    include: Vec<String>,
    exclude: Vec<String>,
    concurrency: u32,
    respect_robots: bool,
    force: bool,
    follow: bool,
) -> Result<()> {
    let api_key = require_api_key(ctx).await?;

    let params = MapParams {
        url,
        max_depth,
        max_pages,
        include_patterns: include,
        exclude_patterns: exclude,
        respect_robots,
        render: RenderPolicy::Auto,
        timeout_ms: None,
        concurrency,
        force,
    };

    let job = ctx
        .engine
        .submit(&api_key, JobType::Map, serde_json::to_value(&params)?, None)
        .await?;
    info!(job_id = %job.id, "map job submitted");

    if follow {
        follow_job(ctx, &api_key, job.id).await?;
    } else {
        print_json(&job)?;
    }
    Ok(())
}

/// Poll until the job is terminal, then print its results payload.
pub async fn follow_job(ctx: &AppContext, api_key: &ApiKeyRecord, id: uuid::Uuid) -> Result<()> {
    loop {
        let job = ctx.engine.status(api_key, id).await?;
        if job.status.is_terminal() {
            let finished = ctx.engine.results(api_key, id).await?;
            print_json(&finished)?;
            return Ok(());
        }
        info!(
            job_id = %id,
            status = job.status.as_str(),
            discovered = job.pages_discovered,
            "waiting"
        );
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
