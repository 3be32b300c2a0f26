//! Sweep worker binary
//!
//! Connects to the run store, then claims and executes runs for its cluster
//! until the stop file appears or the process is interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use sweep_store::PgRunStore;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sweep_worker::code::CodeResolver;
use sweep_worker::pipeline::{FileCopier, NoopCopier, PipelineBuilder, ResultsCopier};
use sweep_worker::runners::RunnerRegistry;
use sweep_worker::{Config, ExecutionSandbox, RunPoller};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sweep_worker=info,sweep_store=info,sweep_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sweep worker");

    let config = Config::from_env().context("Invalid worker configuration")?;
    info!(
        "Loaded configuration: worker_id={}, cluster={}, hostname={}",
        config.worker_id, config.cluster_name, config.hostname
    );

    let store = Arc::new(connect_with_retry(&config.database_url).await?);
    info!("Run store connected");

    let runners = RunnerRegistry::with_builtins();
    info!("Available runners: {}", runners.names().join(", "));

    let sandbox = Arc::new(ExecutionSandbox::new(
        config.output_dir.clone(),
        Arc::new(CodeResolver::with_builtins(config.model_dir.clone())),
        Arc::new(runners),
    ));

    let copier: Arc<dyn ResultsCopier> = match &config.results_dir {
        Some(dir) => {
            info!("Copying results to {}", dir.display());
            Arc::new(FileCopier::new(dir.clone(), config.hostname.clone()))
        }
        None => {
            info!("No results directory configured, leaving output in place");
            Arc::new(NoopCopier::new(config.hostname.clone()))
        }
    };
    let pipeline = Arc::new(
        PipelineBuilder::new(copier)
            .update_store(store.clone())
            .retry(config.retry_policy())
            .spawn(),
    );

    let poller = Arc::new(RunPoller::new(config, store, sandbox, pipeline));

    let interrupted = Arc::clone(&poller);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, stopping running runs");
                interrupted.stop_all();
                interrupted.request_shutdown();
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    poller.run().await;

    info!("Sweep worker stopped");
    Ok(())
}

/// Connects to the run store with exponential backoff
///
/// The database may not be ready yet when the worker starts (common in
/// container environments).
async fn connect_with_retry(database_url: &str) -> Result<PgRunStore> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match PgRunStore::connect(database_url).await {
            Ok(store) => {
                if attempt > 1 {
                    info!("Connected to run store after {} attempt(s)", attempt);
                }
                return Ok(store);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to connect to run store after {} attempts", MAX_RETRIES);
                    return Err(e).context("Failed to connect to run store");
                }

                warn!(
                    "Failed to connect to run store (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
