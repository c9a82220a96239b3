pub mod extract;
pub mod jobs;
pub mod keys;
pub mod map;
pub mod scrape;
pub mod search;
pub mod status;
pub mod worker;

use anyhow::{bail, Result};
use uuid::Uuid;

use sift_core::ApiKeyRecord;

use crate::context::AppContext;

/// Data commands authenticate exactly like remote callers: with a
/// plaintext key from SIFT_API_KEY.
pub async fn require_api_key(ctx: &AppContext) -> Result<ApiKeyRecord> {
    let Ok(plaintext) = std::env::var("SIFT_API_KEY") else {
        bail!("SIFT_API_KEY is not set; create one with `sift keys create`");
    };
    Ok(ctx.storage.authenticate_api_key(&plaintext).await?)
}

pub fn parse_job_id(id: &str) -> Result<Uuid> {
    Uuid::try_parse(id).map_err(|_| anyhow::anyhow!("{id} is not a job id"))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
