use anyhow::Result;

use crate::commands::print_json;
use crate::context::AppContext;

pub async fn run(ctx: &AppContext) -> Result<()> {
    ctx.storage.check_connectivity().await?;
    let pages = ctx.storage.page_count().await?;
    let queued = ctx.storage.queue_depth().await?;
    let events = ctx.storage.event_count().await?;

    print_json(&serde_json::json!({
        "pages_cached": pages,
        "jobs_queued": queued,
        "events": events,
    }))
}
