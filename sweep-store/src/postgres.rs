//! Postgres-backed `RunStore`

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use sweep_core::{
    ClaimFilter, Parameters, Run, RunId, RunQuery, RunState, RunStore, StateError, StoreError,
    StoreResult,
};
use tracing::{debug, info};

use crate::repository::params as param_repository;
use crate::repository::run::{self as run_repository, RunRow};

/// Shared run store on a Postgres database
#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and makes sure the schema exists
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = crate::db::create_pool(database_url)
            .await
            .map_err(StoreError::backend)?;
        crate::db::run_migrations(&pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn hydrate(conn: &mut PgConnection, rows: Vec<RunRow>) -> StoreResult<Vec<Run>> {
        let ids: Vec<RunId> = rows.iter().map(|row| row.run_id).collect();
        let mut params = param_repository::find_by_run_ids(conn, &ids).await?;
        rows.into_iter()
            .map(|row| {
                let run_params = params.remove(&row.run_id).unwrap_or_default();
                row.into_run(run_params)
            })
            .collect()
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn insert_runs(&self, runs: &mut [Run]) -> StoreResult<()> {
        if runs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let first = run_repository::allocate_ids(&mut tx, runs.len() as i64)
            .await
            .map_err(StoreError::backend)?;

        for (offset, run) in runs.iter().enumerate() {
            let id = first + offset as i64;
            run_repository::insert(&mut tx, id, run)
                .await
                .map_err(StoreError::backend)?;
            param_repository::insert(&mut tx, id, &run.parameters)
                .await
                .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;

        // ids become visible to callers only once the batch is committed
        for (offset, run) in runs.iter_mut().enumerate() {
            run.id = Some(first + offset as i64);
        }

        info!(
            first_id = first,
            count = runs.len(),
            "Inserted run batch"
        );
        Ok(())
    }

    async fn claim_next(
        &self,
        cluster_name: &str,
        filter: &ClaimFilter,
    ) -> StoreResult<Option<Run>> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let row = run_repository::claim_next(
            &mut tx,
            cluster_name,
            filter.run_ids.as_deref(),
            filter.runset.as_deref(),
        )
        .await
        .map_err(StoreError::backend)?;

        let Some(row) = row else {
            tx.commit().await.map_err(StoreError::backend)?;
            return Ok(None);
        };

        let mut runs = Self::hydrate(&mut tx, vec![row]).await?;
        tx.commit().await.map_err(StoreError::backend)?;

        let run = runs.pop();
        if let Some(run) = &run {
            debug!(run_id = ?run.id, cluster = cluster_name, "Claimed run");
        }
        Ok(run)
    }

    async fn persist_run(&self, run: &Run) -> StoreResult<()> {
        let id = run
            .id
            .ok_or_else(|| StoreError::UnassignedId(run.name()))?;

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        if let Some(stored) = run_repository::lock_state(&mut tx, id)
            .await
            .map_err(StoreError::backend)?
        {
            let stored: RunState = stored
                .parse()
                .map_err(|e: String| StoreError::corrupt(id, e))?;
            if !stored.can_advance_to(run.state()) {
                return Err(StoreError::IllegalTransition {
                    run_id: id,
                    source: StateError {
                        from: stored,
                        to: run.state(),
                    },
                });
            }
        }

        run_repository::upsert(&mut tx, id, run)
            .await
            .map_err(StoreError::backend)?;
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn find_runs(&self, query: &RunQuery) -> StoreResult<Vec<Run>> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::backend)?;
        let rows = run_repository::find(&mut conn, query)
            .await
            .map_err(StoreError::backend)?;
        Self::hydrate(&mut conn, rows).await
    }

    async fn get_run(&self, id: RunId) -> StoreResult<Run> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::backend)?;
        let row = run_repository::find_by_id(&mut conn, id)
            .await
            .map_err(StoreError::backend)?
            .ok_or(StoreError::NotFound(id))?;
        let parameters = param_repository::find_by_run_ids(&mut conn, &[id])
            .await?
            .remove(&id)
            .unwrap_or_else(Parameters::new);
        row.into_run(parameters)
    }
}
