use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use sweep_core::{CopyError, Run, RunState, RunStore, StoreError};
use tracing::{error, warn};

use super::{CopyOutcome, CopyStage, Next};

/// Records the copy outcome in the run store
///
/// A successful run whose output was copied becomes `copied`; a failed run
/// stays `completed` with its output location recorded. A copy that fails
/// for good makes the run `copy_failed`. The run is persisted either way and
/// a persistence failure is only logged.
pub struct DbUpdatingStage {
    store: Arc<dyn RunStore>,
}

impl DbUpdatingStage {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CopyStage for DbUpdatingStage {
    async fn process(
        &self,
        run: &Run,
        source: &Path,
        success: bool,
        next: Next<'_>,
    ) -> Result<CopyOutcome, CopyError> {
        if run.state() != RunState::Completed {
            warn!(
                run_id = ?run.id,
                state = %run.state(),
                "Expected run to be completed before copying results; copying anyway"
            );
        }

        let result = next.run(run, source, success).await;

        let mut updated = run.clone();
        let target = match &result {
            Ok(outcome) => {
                updated.output_host = Some(outcome.output_host.clone());
                updated.output_path = Some(outcome.output_path.clone());
                success.then_some(RunState::Copied)
            }
            Err(e) => {
                warn!(run_id = ?run.id, "Error copying results: {}", e);
                Some(RunState::CopyFailed)
            }
        };
        if let Some(target) = target {
            if let Err(e) = updated.advance(target) {
                warn!(run_id = ?run.id, "Leaving run state unchanged: {}", e);
            }
        }

        if let Err(e) = self.persist(&updated).await {
            error!(run_id = ?run.id, "Failure updating run after copy: {}", e);
        }

        result
    }
}

impl DbUpdatingStage {
    /// Persists the copy outcome, first completing a run whose completion
    /// never reached the store
    async fn persist(&self, run: &Run) -> Result<(), StoreError> {
        let err = match self.store.persist_run(run).await {
            Err(e @ StoreError::IllegalTransition { .. }) => e,
            other => return other,
        };
        let Some(id) = run.id else {
            return Err(err);
        };
        let finished = matches!(run.state(), RunState::Copied | RunState::CopyFailed);
        if !finished || self.store.get_run(id).await?.state() != RunState::InProgress {
            return Err(err);
        }

        warn!(run_id = id, "Run completion was never stored; storing it before the copy state");
        self.store
            .persist_run(&run.clone().with_state(RunState::Completed))
            .await?;
        self.store.persist_run(run).await
    }
}
