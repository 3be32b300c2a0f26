//! Results pipeline
//!
//! Moves a finished run's output to its final location and records the
//! outcome. A pipeline is an ordered list of [`CopyStage`]s in front of a
//! terminal [`ResultsCopier`], fed by an asynchronous FIFO queue:
//!
//! ```text
//! queue -> DbUpdating -> Retrying -> copier
//! ```

mod db_updating;
mod file;
mod queue;
mod retrying;

pub use db_updating::DbUpdatingStage;
pub use file::{FileCopier, NoopCopier};
pub use queue::ResultsPipeline;
pub use retrying::{RetryPolicy, RetryingStage};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sweep_core::{CopyError, Run, RunStore};

/// Where a run's output ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub output_host: String,
    pub output_path: PathBuf,
}

/// Transport-specific copy of one run's output directory
#[async_trait]
pub trait ResultsCopier: Send + Sync {
    async fn copy(&self, run: &Run, source: &Path, success: bool)
    -> Result<CopyOutcome, CopyError>;
}

/// One step of the pipeline
///
/// A stage decides whether, and how often, to hand the job to `next`.
#[async_trait]
pub trait CopyStage: Send + Sync {
    async fn process(
        &self,
        run: &Run,
        source: &Path,
        success: bool,
        next: Next<'_>,
    ) -> Result<CopyOutcome, CopyError>;
}

/// The remainder of a chain after the current stage
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn CopyStage>],
    copier: &'a dyn ResultsCopier,
}

impl<'a> Next<'a> {
    /// Runs the remaining stages and the copier
    pub async fn run(
        self,
        run: &Run,
        source: &Path,
        success: bool,
    ) -> Result<CopyOutcome, CopyError> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    copier: self.copier,
                };
                stage.process(run, source, success, next).await
            }
            None => self.copier.copy(run, source, success).await,
        }
    }
}

/// Stages plus the terminal copier, run synchronously
#[derive(Clone)]
pub struct CopyChain {
    stages: Vec<Arc<dyn CopyStage>>,
    copier: Arc<dyn ResultsCopier>,
}

impl CopyChain {
    pub async fn copy(
        &self,
        run: &Run,
        source: &Path,
        success: bool,
    ) -> Result<CopyOutcome, CopyError> {
        Next {
            stages: &self.stages,
            copier: self.copier.as_ref(),
        }
        .run(run, source, success)
        .await
    }
}

/// Builds a pipeline; stages run in the order they are added
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn CopyStage>>,
    copier: Arc<dyn ResultsCopier>,
}

impl PipelineBuilder {
    pub fn new(copier: Arc<dyn ResultsCopier>) -> Self {
        Self {
            stages: Vec::new(),
            copier,
        }
    }

    pub fn stage(mut self, stage: Arc<dyn CopyStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Records the copy outcome through `store`
    pub fn update_store(self, store: Arc<dyn RunStore>) -> Self {
        self.stage(Arc::new(DbUpdatingStage::new(store)))
    }

    /// Retries failed copies
    pub fn retry(self, policy: RetryPolicy) -> Self {
        self.stage(Arc::new(RetryingStage::new(policy)))
    }

    /// Chain without the queue in front
    pub fn build(self) -> CopyChain {
        CopyChain {
            stages: self.stages,
            copier: self.copier,
        }
    }

    /// Starts the background worker draining the queue
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(self) -> ResultsPipeline {
        ResultsPipeline::spawn(self.build())
    }
}
