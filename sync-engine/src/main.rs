use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tracing::info;

use shared::telemetry::{init_logging, LoggingConfig};
use shared::Config;

use cloudmesh_sync_engine::scheduler::Scheduler;
use cloudmesh_sync_engine::worker::run_worker_loop;
use cloudmesh_sync_engine::Services;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    init_logging(LoggingConfig::from_env("cloudmesh-sync-engine"))?;
    info!("starting sync engine");

    let config = Config::from_env();
    let max_concurrent_tasks = config.worker.max_concurrent_tasks;

    let services = Arc::new(Services::build(config).await?);

    let scheduler = Scheduler::new(services.clone());
    tokio::spawn(async move {
        scheduler.run().await;
    });

    for worker_id in 0..max_concurrent_tasks {
        let services = services.clone();
        tokio::spawn(async move {
            info!(worker_id, "worker loop started");
            run_worker_loop(services).await;
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    Ok(())
}
