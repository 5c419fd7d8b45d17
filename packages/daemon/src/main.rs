//! Queue daemon: runs the promoter and a worker pool per registered job type
//! until interrupted.

use std::error::Error;
use std::time::Duration;

use actors::{FnHandler, JobHandlerRegistry, JobQueue};
use db::{DbConfig, SurrealStore};
use queue_core::{Job, QueueConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONCURRENCY: usize = 2;

fn handlers() -> JobHandlerRegistry {
    let mut registry = JobHandlerRegistry::new();

    registry.register(
        "echo",
        FnHandler::new(|job: Job| async move {
            tracing::info!(job_id = %job.id, data = %job.data, "echo");
            Ok(())
        }),
    );

    registry.register(
        "sleep",
        FnHandler::new(|job: Job| async move {
            let ms = job.data.get("ms").and_then(|v| v.as_u64()).unwrap_or(1000);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        }),
    );

    registry.register(
        "fail",
        FnHandler::new(|job: Job| async move {
            let reason = job
                .data
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("requested failure");
            Err(reason.to_string())
        }),
    );

    registry
}

fn concurrency() -> Result<usize, Box<dyn Error>> {
    match std::env::var("QUEUE_CONCURRENCY") {
        Ok(raw) if !raw.trim().is_empty() => Ok(raw.trim().parse()?),
        _ => Ok(DEFAULT_CONCURRENCY),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = QueueConfig::from_env()?;
    let db_config = DbConfig::from_env()?;
    let concurrency = concurrency()?;

    tracing::info!(endpoint = %db_config.endpoint, prefix = %config.prefix, "Opening store");
    let store = SurrealStore::open(&db_config).await?;
    let queue = JobQueue::new(store, config);

    let mut subscription = queue.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            tracing::debug!(kind = event.name(), ?event, "Queue event");
        }
    });

    queue.promote_default().await?;

    let registry = handlers();
    for job_type in registry.job_types() {
        if let Some(handler) = registry.get(job_type) {
            queue.process(job_type, concurrency, handler).await?;
        }
    }

    tracing::info!(concurrency, "Queue running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    queue.close().await?;
    Ok(())
}
