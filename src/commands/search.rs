use anyhow::Result;

use sift_core::SearchKind;
use sift_search::SearchRequest;

use crate::commands::{print_json, require_api_key};
use crate::context::AppContext;

pub async fn run(ctx: &AppContext, query: String, num_results: u32, scrape_top_n: u32) -> Result<()> {
    let api_key = require_api_key(ctx).await?;
    let req = SearchRequest {
        query,
        num_results,
        scrape_top_n,
        search_type: SearchKind::Web,
    };
    let results = ctx.search.search(&api_key, &req).await?;
    print_json(&results)
}
