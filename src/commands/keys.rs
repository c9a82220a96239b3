use anyhow::{bail, Result};
use uuid::Uuid;

use sift_core::Scope;

use crate::cli::KeysCommand;
use crate::commands::print_json;
use crate::context::AppContext;

pub async fn run(ctx: &AppContext, command: KeysCommand) -> Result<()> {
    match command {
        KeysCommand::Create { name, scopes, rate_limit } => {
            let scopes = parse_scopes(&scopes)?;
            let (plaintext, record) = ctx.storage.create_api_key(&name, &scopes, rate_limit).await?;
            // The only time the secret is ever shown.
            print_json(&serde_json::json!({
                "key": plaintext,
                "record": record,
            }))
        }
        KeysCommand::List => {
            let keys = ctx.storage.list_api_keys().await?;
            print_json(&keys)
        }
        KeysCommand::Rename { id, name } => {
            let id = Uuid::try_parse(&id).map_err(|_| anyhow::anyhow!("{id} is not a key id"))?;
            if !ctx.storage.rename_api_key(id, &name).await? {
                bail!("no key with id {id}");
            }
            println!("renamed {id}");
            Ok(())
        }
        KeysCommand::Revoke { id } => {
            let id = Uuid::try_parse(&id).map_err(|_| anyhow::anyhow!("{id} is not a key id"))?;
            if !ctx.storage.revoke_api_key(id).await? {
                bail!("no key with id {id}");
            }
            println!("revoked {id}");
            Ok(())
        }
    }
}

fn parse_scopes(raw: &str) -> Result<Vec<Scope>> {
    let mut scopes = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match Scope::parse(part) {
            Some(scope) => scopes.push(scope),
            None => bail!("unknown scope {part:?} (expected scrape, map, search, agent or admin)"),
        }
    }
    if scopes.is_empty() {
        bail!("at least one scope is required");
    }
    Ok(scopes)
}
