use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use crate::context::AppContext;

/// Run the worker pool and reaper until ctrl-c, then drain.
pub async fn run(ctx: &AppContext) -> Result<()> {
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let handles = ctx.engine.spawn_workers(&shutdown_tx);

    info!(workers = ctx.config.jobs.workers, "press Ctrl+C to stop");
    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }
    info!("shutdown complete");
    Ok(())
}
