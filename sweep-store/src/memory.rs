//! In-memory `RunStore` for tests or local runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sweep_core::{
    ClaimFilter, Run, RunId, RunQuery, RunState, RunStore, StateError, StoreError, StoreResult,
};
use tracing::debug;

#[derive(Debug)]
struct MemoryState {
    next_id: RunId,
    runs: BTreeMap<RunId, Run>,
}

/// Store that keeps runs in process memory
///
/// Clones share the same runs.
#[derive(Debug, Clone)]
pub struct MemoryRunStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                next_id: 1,
                runs: BTreeMap::new(),
            })),
        }
    }
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored run, ordered by id
    pub fn runs(&self) -> Vec<Run> {
        self.lock().runs.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert_runs(&self, runs: &mut [Run]) -> StoreResult<()> {
        let mut state = self.lock();
        for run in runs.iter_mut() {
            let id = state.next_id;
            state.next_id += 1;
            run.id = Some(id);
            state.runs.insert(id, run.clone());
        }
        Ok(())
    }

    async fn claim_next(
        &self,
        cluster_name: &str,
        filter: &ClaimFilter,
    ) -> StoreResult<Option<Run>> {
        let mut state = self.lock();
        let claimed = state.runs.values_mut().find(|run| {
            run.state() == RunState::Scheduled
                && run.cluster_name == cluster_name
                && filter.matches(run)
        });

        let Some(run) = claimed else {
            return Ok(None);
        };
        run.advance(RunState::InProgress)
            .map_err(|source| StoreError::IllegalTransition {
                run_id: run.id.unwrap_or_default(),
                source,
            })?;
        debug!(run_id = ?run.id, cluster = cluster_name, "Claimed run");
        Ok(Some(run.clone()))
    }

    async fn persist_run(&self, run: &Run) -> StoreResult<()> {
        let id = run
            .id
            .ok_or_else(|| StoreError::UnassignedId(run.name()))?;

        let mut state = self.lock();
        if let Some(stored) = state.runs.get(&id) {
            if !stored.state().can_advance_to(run.state()) {
                return Err(StoreError::IllegalTransition {
                    run_id: id,
                    source: StateError {
                        from: stored.state(),
                        to: run.state(),
                    },
                });
            }
        }
        state.runs.insert(id, run.clone());
        Ok(())
    }

    async fn find_runs(&self, query: &RunQuery) -> StoreResult<Vec<Run>> {
        Ok(self
            .lock()
            .runs
            .values()
            .filter(|run| query.matches(run))
            .cloned()
            .collect())
    }

    async fn get_run(&self, id: RunId) -> StoreResult<Run> {
        self.lock()
            .runs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_core::{CodeSource, NewRun, Parameters};

    fn new_run(cluster: &str, runset: &str) -> Run {
        Run::from(NewRun {
            project_name: "proj".to_string(),
            scenario_name: None,
            code_source: CodeSource::local("/models/m"),
            runner_class: "null".to_string(),
            runner_flags: String::new(),
            parameters: Parameters::from_iter([("a", 1)]),
            runset: runset.to_string(),
            cluster_name: cluster.to_string(),
        })
    }

    #[tokio::test]
    async fn test_insert_assigns_contiguous_ids() {
        let store = MemoryRunStore::new();
        let mut batch = vec![new_run("c", "r"), new_run("c", "r"), new_run("c", "r")];

        store.insert_runs(&mut batch).await.unwrap();

        let ids: Vec<_> = batch.iter().map(|run| run.id.unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        for run in store.runs() {
            assert_eq!(run.state(), RunState::Scheduled);
        }
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let store = MemoryRunStore::new();
        let mut batch = vec![new_run("c", "r"), new_run("c", "r")];
        store.insert_runs(&mut batch).await.unwrap();

        let first = store
            .claim_next("c", &ClaimFilter::default())
            .await
            .unwrap()
            .unwrap();
        let second = store
            .claim_next("c", &ClaimFilter::default())
            .await
            .unwrap()
            .unwrap();
        let none = store.claim_next("c", &ClaimFilter::default()).await.unwrap();

        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));
        assert_eq!(first.state(), RunState::InProgress);
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_cluster_and_filter() {
        let store = MemoryRunStore::new();
        let mut batch = vec![
            new_run("other", "nightly"),
            new_run("c", "weekly"),
            new_run("c", "nightly_2"),
        ];
        store.insert_runs(&mut batch).await.unwrap();

        let filter = ClaimFilter {
            run_ids: None,
            runset: Some("nightly%".to_string()),
        };
        let run = store.claim_next("c", &filter).await.unwrap().unwrap();

        assert_eq!(run.id, Some(3));
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_exclusive() {
        let store = MemoryRunStore::new();
        let mut batch = vec![new_run("c", "r")];
        store.insert_runs(&mut batch).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_next("c", &ClaimFilter::default())
                    .await
                    .unwrap()
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_persist_is_idempotent_and_rejects_regression() {
        let store = MemoryRunStore::new();
        let mut batch = vec![new_run("c", "r")];
        store.insert_runs(&mut batch).await.unwrap();
        let mut run = store
            .claim_next("c", &ClaimFilter::default())
            .await
            .unwrap()
            .unwrap();

        run.hostname = Some("host-1".to_string());
        run.advance(RunState::Completed).unwrap();
        store.persist_run(&run).await.unwrap();
        store.persist_run(&run).await.unwrap();

        let stored = store.get_run(1).await.unwrap();
        assert_eq!(stored.state(), RunState::Completed);
        assert_eq!(stored.hostname.as_deref(), Some("host-1"));

        let stale = run.clone().with_state(RunState::Scheduled);
        let err = store.persist_run(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { run_id: 1, .. }));
    }

    #[tokio::test]
    async fn test_persist_unassigned_run() {
        let store = MemoryRunStore::new();
        let err = store.persist_run(&new_run("c", "r")).await.unwrap_err();
        assert!(matches!(err, StoreError::UnassignedId(_)));
    }

    #[tokio::test]
    async fn test_find_runs_by_state_and_host() {
        let store = MemoryRunStore::new();
        let mut batch = vec![new_run("c", "r"), new_run("c", "r")];
        store.insert_runs(&mut batch).await.unwrap();
        let mut run = store
            .claim_next("c", &ClaimFilter::default())
            .await
            .unwrap()
            .unwrap();
        run.hostname = Some("h".to_string());
        store.persist_run(&run).await.unwrap();

        let query = RunQuery {
            states: vec![RunState::InProgress],
            hostname: Some("h".to_string()),
            ..Default::default()
        };
        let found = store.find_runs(&query).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(1));
        assert!(matches!(
            store.get_run(99).await,
            Err(StoreError::NotFound(99))
        ));
    }
}
