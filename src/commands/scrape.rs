use anyhow::{bail, Result};

use sift_core::{RenderPolicy, ScrapeRequest};

use crate::commands::{print_json, require_api_key};
use crate::context::AppContext;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &AppContext,
    url: String,
    render: String,
    respect_robots: bool,
    force: bool,
    raw_html: bool,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let api_key = require_api_key(ctx).await?;

    let render = match render.as_str() {
        "auto" => RenderPolicy::Auto,
        "always" => RenderPolicy::Always,
        "never" => RenderPolicy::Never,
        other => bail!("unknown render policy {other:?} (expected auto, always or never)"),
    };

    let mut req = ScrapeRequest::new(url);
    req.render = render;
    req.respect_robots = respect_robots;
    req.force_refresh = force;
    req.include_raw_html = raw_html;
    req.include_links = true;
    req.timeout_ms = timeout_ms;

    // Same gate a remote caller would hit: scope check and rate-limit
    // admission, then the pipeline.
    let outcome = ctx.coordinator.scrape(&api_key, &req).await?;
    let shaped = outcome.shaped(&req);

    print_json(&serde_json::json!({
        "cached": shaped.cached,
        "cache_layer": shaped.cache_layer,
        "page": shaped.page,
    }))
}
