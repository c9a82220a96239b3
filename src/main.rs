mod cli;
mod commands;
mod context;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// glibc malloc holds on to memory under high task churn; mimalloc gives
// it back.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use sift_core::AppConfig;

use crate::cli::{Cli, Commands};
use crate::context::AppContext;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;
    apply_env_overrides(&mut config);

    let ctx = AppContext::init(config).await?;

    match cli.command {
        Commands::Worker => commands::worker::run(&ctx).await?,
        Commands::Scrape {
            url,
            render,
            respect_robots,
            force,
            raw_html,
            timeout_ms,
        } => {
            commands::scrape::run(&ctx, url, render, respect_robots, force, raw_html, timeout_ms).await?
        }
        Commands::Map {
            url,
            max_depth,
            max_pages,
            include,
            exclude,
            concurrency,
            respect_robots,
            force,
            follow,
        } => {
            commands::map::run(
                &ctx,
                url,
                max_depth,
                max_pages,
                include,
                exclude,
                concurrency,
                respect_robots,
                force,
                follow,
            )
            .await?
        }
        Commands::Search {
            query,
            num_results,
            scrape_top_n,
        } => commands::search::run(&ctx, query, num_results, scrape_top_n).await?,
        Commands::Extract {
            url,
            prompt,
            schema_file,
            follow,
        } => commands::extract::run(&ctx, url, prompt, schema_file, follow).await?,
        Commands::Jobs { command } => commands::jobs::run(&ctx, command).await?,
        Commands::Status => commands::status::run(&ctx).await?,
        Commands::Keys { command } => commands::keys::run(&ctx, command).await?,
    }

    Ok(())
}

/// Environment overrides for deployment knobs and secrets.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = std::env::var("DATABASE_URL") {
        config.database.postgres_url = v;
    }
    if let Ok(v) = std::env::var("SIFT_WORKERS") {
        if let Ok(n) = v.parse::<usize>() {
            if n > 0 && n <= 64 {
                config.jobs.workers = n;
            }
        }
    }
    if let Ok(v) = std::env::var("SIFT_USER_AGENT") {
        config.general.user_agent = v;
    }
    if let Ok(v) = std::env::var("LLM_API_KEY") {
        config.llm.api_key = v;
    }
    if let Ok(v) = std::env::var("LLM_MODEL") {
        config.llm.model = v;
    }
    if let Ok(v) = std::env::var("SEARCH_API_KEY") {
        config.search.api_key = v;
    }
    if let Ok(v) = std::env::var("SEARCH_ENDPOINT") {
        config.search.endpoint = v;
    }
    if let Ok(v) = std::env::var("CHROME_PATH") {
        config.render.chrome_path = Some(v);
    }
    if let Ok(v) = std::env::var("RENDER_ENABLED") {
        config.render.enabled = v != "0" && v.to_lowercase() != "false";
    }
}
