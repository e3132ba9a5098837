//! Periodically purges workflows marked for deletion.

mod config;

use crate::config::ReaperConfig;
use conduit_hook_client::HttpHookService;
use conduit_store::{MIGRATOR, PgWorkflowStore};
use conduit_workflow::WorkflowService;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ReaperConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let pool = config
        .store
        .connect()
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    MIGRATOR.run(&pool).await.expect("failed to run migrations");

    let hooks = HttpHookService::new(&config.hooks).expect("failed to build hook client");
    let service = WorkflowService::new(PgWorkflowStore::new(pool), hooks);

    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_seconds));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match service.purge_marked_for_delete().await {
                    Ok(count) if count > 0 => {
                        tracing::info!(purged_workflows = count, "Periodic workflow purge");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to purge workflows");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }
}
