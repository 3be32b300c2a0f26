use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use sweep_core::Run;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::CopyChain;

struct CopyJob {
    run: Run,
    source: PathBuf,
    success: bool,
}

/// Asynchronous front of a [`CopyChain`]
///
/// Jobs are accepted without blocking and processed one at a time, in
/// submission order, by a single background task.
pub struct ResultsPipeline {
    sender: Mutex<Option<mpsc::UnboundedSender<CopyJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ResultsPipeline {
    pub(crate) fn spawn(chain: CopyChain) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<CopyJob>();

        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                debug!(run_id = ?job.run.id, "Processing copy job");
                if let Err(e) = chain.copy(&job.run, &job.source, job.success).await {
                    error!(run_id = ?job.run.id, "Results copy failed: {}", e);
                }
            }
            info!("Results pipeline drained");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues a run's output for copying and returns immediately
    pub fn copy_results(&self, run: Run, source: PathBuf, success: bool) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            error!(run_id = ?run.id, "Results pipeline is shut down; dropping copy job");
            return;
        };
        if let Err(e) = sender.send(CopyJob {
            run,
            source,
            success,
        }) {
            error!(run_id = ?e.0.run.id, "Results pipeline worker is gone; dropping copy job");
        }
    }

    /// Stops accepting jobs and waits for the queued ones to finish
    pub async fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Results pipeline worker panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::testing::FlakyCopier;
    use crate::pipeline::{PipelineBuilder, RetryPolicy};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use sweep_core::{
        ClaimFilter, CodeSource, NewRun, Parameters, Run, RunQuery, RunState, RunStore,
    };
    use sweep_store::MemoryRunStore;

    fn new_run(runset: &str) -> Run {
        Run::from(NewRun {
            project_name: "p".to_string(),
            scenario_name: None,
            code_source: CodeSource::local("."),
            runner_class: "null".to_string(),
            runner_flags: String::new(),
            parameters: Parameters::new(),
            runset: runset.to_string(),
            cluster_name: "c".to_string(),
        })
    }

    #[tokio::test]
    async fn test_jobs_processed_in_submission_order() {
        let copier = Arc::new(FlakyCopier::new(0));
        let pipeline = PipelineBuilder::new(copier.clone()).spawn();

        for id in 1..=5 {
            let mut run = new_run("r");
            run.id = Some(id);
            pipeline.copy_results(run, PathBuf::from(format!("/out/{}", id)), true);
        }
        pipeline.shutdown().await;

        assert_eq!(
            *copier.order.lock().unwrap(),
            vec![Some(1), Some(2), Some(3), Some(4), Some(5)]
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_into_store() {
        let store = Arc::new(MemoryRunStore::default());
        let mut runs = vec![new_run("r"), new_run("r")];
        store.insert_runs(&mut runs).await.unwrap();

        let copier = Arc::new(FlakyCopier::new(1));
        let pipeline = PipelineBuilder::new(copier.clone())
            .update_store(store.clone())
            .retry(RetryPolicy::new(3, Duration::from_millis(1)))
            .spawn();

        for _ in 0..2 {
            let mut run = store
                .claim_next("c", &ClaimFilter::default())
                .await
                .unwrap()
                .unwrap();
            run.advance(RunState::Completed).unwrap();
            store.persist_run(&run).await.unwrap();
            pipeline.copy_results(run, PathBuf::from("/out/p_r"), true);
        }
        pipeline.shutdown().await;

        let copied = store
            .find_runs(&RunQuery {
                states: vec![RunState::Copied],
                ..RunQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(copier.calls(), 3);
        assert!(
            copied
                .iter()
                .all(|run| run.output_host.as_deref() == Some("results-host"))
        );
    }

    #[tokio::test]
    async fn test_copy_after_shutdown_is_dropped() {
        let copier = Arc::new(FlakyCopier::new(0));
        let pipeline = PipelineBuilder::new(copier.clone()).spawn();
        pipeline.shutdown().await;

        pipeline.copy_results(new_run("r"), PathBuf::from("/out/x"), true);

        assert_eq!(copier.calls(), 0);
    }
}
