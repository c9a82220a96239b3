use anyhow::Result;

use crate::cli::JobsCommand;
use crate::commands::{parse_job_id, print_json, require_api_key};
use crate::context::AppContext;

pub async fn run(ctx: &AppContext, command: JobsCommand) -> Result<()> {
    let api_key = require_api_key(ctx).await?;
    match command {
        JobsCommand::Status { id } => {
            let job = ctx.engine.status(&api_key, parse_job_id(&id)?).await?;
            print_json(&job)
        }
        JobsCommand::Results { id } => {
            let job = ctx.engine.results(&api_key, parse_job_id(&id)?).await?;
            print_json(&job)
        }
        JobsCommand::Cancel { id } => {
            let job = ctx.engine.cancel(&api_key, parse_job_id(&id)?).await?;
            print_json(&job)
        }
    }
}
