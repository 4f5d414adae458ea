//! Image enhancement worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use enhance_models::ModelName;
use enhance_queue::{QueueConfig, RedisJobQueue, RedisResultStore};
use enhance_worker::logging::init_tracing;
use enhance_worker::metrics::init_metrics;
use enhance_worker::{JobExecutor, JobProcessor, OnnxLoader, TransformRegistry, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting enhance-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        init_metrics(port)?;
    }

    ModelName::validate_registry().context("model registry is inconsistent")?;

    let queue_config = QueueConfig::from_env();
    let queue = RedisJobQueue::new(queue_config.clone()).context("failed to create job queue")?;
    let store = RedisResultStore::new(&queue_config).context("failed to create result store")?;

    let registry = Arc::new(TransformRegistry::new(OnnxLoader::new(&config.models_dir)));
    if !config.preload_models.is_empty() {
        let preload = config.preload_models.clone();
        let registry = Arc::clone(&registry);
        let loaded = tokio::task::spawn_blocking(move || registry.preload(&preload)).await?;
        if let Err(e) = loaded {
            error!("Failed to preload models: {}", e);
            std::process::exit(1);
        }
        info!(models = ?config.preload_models, "Models preloaded");
    }

    let processor = Arc::new(JobProcessor::new(registry, config.enhance_config()));
    let shutdown_timeout = config.shutdown_timeout;
    let executor = Arc::new(JobExecutor::new(
        config,
        Arc::new(queue),
        Arc::new(store),
        processor,
    ));
    info!(consumer = %executor.consumer_name(), "Executor ready");

    let mut runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        finished = &mut runner => {
            report_exit(finished);
            return Ok(());
        }
    }

    info!("Received shutdown signal");
    executor.shutdown();
    match tokio::time::timeout(shutdown_timeout, &mut runner).await {
        Ok(finished) => report_exit(finished),
        Err(_) => {
            warn!(
                "In-flight job did not finish within {:?}; it will be redelivered",
                shutdown_timeout
            );
            runner.abort();
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn report_exit(finished: Result<enhance_worker::WorkerResult<()>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Executor error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Executor task failed: {}", e);
            std::process::exit(1);
        }
    }
}
