use anyhow::{Context, Result};
use tracing::info;

use sift_core::{AgentParams, JobType, RenderPolicy};

use crate::commands::{map::follow_job, print_json, require_api_key};
use crate::context::AppContext;

pub async fn run(
    ctx: &AppContext,
    url: String,
    prompt: String,
    schema_file: Option<String>,
    follow: bool,
) -> Result<()> {
    let api_key = require_api_key(ctx).await?;

    let schema_definition = match schema_file {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            Some(serde_json::from_str(&raw).with_context(|| format!("parsing {path} as JSON"))?)
        }
        None => None,
    };

    let params = AgentParams {
        url,
        prompt,
        schema_definition,
        render: RenderPolicy::Auto,
        timeout_ms: None,
    };

    let job = ctx
        .engine
        .submit(&api_key, JobType::AgentExtract, serde_json::to_value(&params)?, None)
        .await?;
    info!(job_id = %job.id, "extract job submitted");

    if follow {
        follow_job(ctx, &api_key, job.id).await?;
    } else {
        print_json(&job)?;
    }
    Ok(())
}
