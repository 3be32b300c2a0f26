//! Run poller
//!
//! Claims scheduled runs for this worker's cluster and executes each one in
//! its own task. A stop file or an explicit shutdown request ends the loop;
//! running runs are then awaited and the results pipeline is drained.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use sweep_core::{Run, RunId, RunState, RunStore, StoreError};
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore, watch};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::pipeline::ResultsPipeline;
use crate::sandbox::ExecutionSandbox;
use crate::stop::StopRun;

type RunningRuns = Arc<Mutex<HashMap<RunId, StopRun>>>;

/// Polls the store and executes claimed runs
pub struct RunPoller {
    config: Config,
    store: Arc<dyn RunStore>,
    sandbox: Arc<ExecutionSandbox>,
    pipeline: Arc<ResultsPipeline>,
    semaphore: Arc<Semaphore>,
    running: RunningRuns,
    host_ip: OnceCell<Option<String>>,
    shutdown: watch::Sender<bool>,
}

impl RunPoller {
    /// Creates a new run poller
    pub fn new(
        config: Config,
        store: Arc<dyn RunStore>,
        sandbox: Arc<ExecutionSandbox>,
        pipeline: Arc<ResultsPipeline>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_runs));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            store,
            sandbox,
            pipeline,
            semaphore,
            running: Arc::new(Mutex::new(HashMap::new())),
            host_ip: OnceCell::new(),
            shutdown,
        }
    }

    /// Runs the polling loop until the stop file appears or shutdown is requested
    pub async fn run(&self) {
        info!(
            cluster = %self.config.cluster_name,
            max_parallel = self.config.max_parallel_runs,
            "Starting run poller (interval: {:?})",
            self.config.poll_interval
        );

        let mut shutdown = self.shutdown.subscribe();

        loop {
            if self.should_stop().await {
                break;
            }

            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            match self.poll_once(permit).await {
                Ok(true) => continue,
                Ok(false) => debug!("No runs available"),
                Err(e) => error!("Error during poll cycle: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.finish().await;
    }

    /// Asks the polling loop to exit after the current cycle
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stops every run currently executing
    pub fn stop_all(&self) {
        let tokens: Vec<(RunId, StopRun)> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, stop)| (*id, stop.clone()))
            .collect();
        for (run_id, stop) in tokens {
            warn!(run_id, "Stopping run");
            stop.stop();
        }
    }

    /// Number of runs currently executing
    pub fn running_count(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn should_stop(&self) -> bool {
        let requested = *self.shutdown.borrow();
        if requested {
            info!("Shutdown requested");
            return true;
        }
        if tokio::fs::try_exists(&self.config.stop_file)
            .await
            .unwrap_or(false)
        {
            info!(stop_file = %self.config.stop_file.display(), "Stop file found");
            return true;
        }
        false
    }

    /// Claims at most one run and starts executing it
    ///
    /// Returns whether a run was claimed. The permit is held by the run's
    /// task, or released right away when nothing was claimed.
    async fn poll_once(&self, permit: OwnedSemaphorePermit) -> Result<bool, StoreError> {
        let filter = self.config.claim_filter();
        let Some(mut run) = self
            .store
            .claim_next(&self.config.cluster_name, &filter)
            .await?
        else {
            return Ok(false);
        };
        let run_id = run.id.ok_or_else(|| StoreError::UnassignedId(run.name()))?;

        run.hostname = Some(self.config.hostname.clone());
        run.host_ip = self.host_ip().await;
        run.start_time = Some(Utc::now());
        if let Err(e) = self.store.persist_run(&run).await {
            error!(
                run_id,
                "Claimed run could not be updated and will not be executed; it stays in_progress"
            );
            return Err(e);
        }

        info!(run_id, run = %run.name(), "Claimed run");

        let stop = StopRun::new();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id, stop.clone());

        tokio::spawn(execute_run(
            run,
            stop,
            Arc::clone(&self.store),
            Arc::clone(&self.sandbox),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.running),
            permit,
        ));

        Ok(true)
    }

    async fn host_ip(&self) -> Option<String> {
        self.host_ip
            .get_or_init(|| resolve_host_ip(&self.config.hostname))
            .await
            .clone()
    }

    /// Waits for running runs, then drains the pipeline
    async fn finish(&self) {
        let running = self.running_count();
        if running > 0 {
            info!(running, "Waiting for running runs to finish");
        }
        let permits = u32::try_from(self.config.max_parallel_runs).unwrap_or(u32::MAX);
        if self.semaphore.acquire_many(permits).await.is_err() {
            warn!("Run semaphore closed while waiting for runs");
        }

        self.pipeline.shutdown().await;
        info!("Run poller stopped");
    }
}

async fn execute_run(
    mut run: Run,
    stop: StopRun,
    store: Arc<dyn RunStore>,
    sandbox: Arc<ExecutionSandbox>,
    pipeline: Arc<ResultsPipeline>,
    running: RunningRuns,
    _permit: OwnedSemaphorePermit,
) {
    let outcome = sandbox.execute(&run, &stop).await;

    if let Some(run_id) = run.id {
        running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);
    }

    run.end_time = Some(Utc::now());
    if let Err(e) = run.advance(RunState::Completed) {
        error!(run_id = ?run.id, "Cannot complete run: {}", e);
    }
    if let Err(e) = store.persist_run(&run).await {
        error!(run_id = ?run.id, "Failed to persist completed run: {}", e);
    }

    pipeline.copy_results(run, outcome.output_path, outcome.success);
}

async fn resolve_host_ip(hostname: &str) -> Option<String> {
    match tokio::net::lookup_host((hostname, 0)).await {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip().to_string()),
        Err(e) => {
            warn!(hostname, "Could not resolve host address: {}", e);
            None
        }
    }
}
