use jobqueue::config::AppConfig;
use jobqueue::logging;
use jobqueue::services::ServiceContainer;
use jobqueue::{Job, handler_fn};
use tracing::{error, info};

/// Queues served when `JOBQUEUE_QUEUES` is unset.
const DEFAULT_QUEUES: &str = "default";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;

    // Initialize logging
    let logging = logging::init_logging(config.log_dir.as_deref())?;

    let container = ServiceContainer::new(&config).await?;
    logging.start_retention_cleanup(container.cancellation_token());
    container.start().await?;

    let queues = std::env::var("JOBQUEUE_QUEUES").unwrap_or_else(|_| DEFAULT_QUEUES.to_string());
    for queue in queues.split(',').map(str::trim).filter(|q| !q.is_empty()) {
        // Delivery to the outbound API is done by the embedding service; the
        // standalone binary only logs what it drains.
        container
            .spawn_worker(
                queue,
                handler_fn(|job: Job| async move {
                    info!(job_id = job.id, queue = %job.queue_name, "Handled job {}", job.name);
                    Ok(())
                }),
            )
            .await?;
    }

    info!("jobqueue initialized successfully");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    container.shutdown().await?;
    Ok(())
}
