//! Run Repository
//!
//! Handles all database operations on the `runs` table.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use std::path::PathBuf;
use sweep_core::{
    CodeSource, NewRun, Parameters, RepositoryKind, Run, RunId, RunQuery, RunState, StoreError,
};

/// Advisory lock key serialising id allocation across processes
const ID_ALLOCATION_LOCK: i64 = 0x5357_4545_5000;

const RUN_COLUMNS: &str = r#"
    run_id, project_name, scenario_name, code_uri, repo_kind, code_revision,
    runner_class, runner_flags, runset, cluster_name, state, hostname, host_ip,
    run_start_time, run_end_time, output_host, output_path
"#;

/// Reserve `count` contiguous ids, returning the first
///
/// Must run inside a transaction; the advisory lock is held until it ends.
pub async fn allocate_ids(conn: &mut PgConnection, count: i64) -> Result<RunId, sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(ID_ALLOCATION_LOCK)
        .execute(&mut *conn)
        .await?;

    let first: i64 = sqlx::query_scalar("SELECT nextval('runs_run_id_seq')")
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query("SELECT setval('runs_run_id_seq', $1, false)")
        .bind(first + count)
        .execute(&mut *conn)
        .await?;

    Ok(first)
}

/// Insert a run row (parameters are written separately)
pub async fn insert(conn: &mut PgConnection, id: RunId, run: &Run) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO runs (run_id, project_name, scenario_name, code_uri, repo_kind,
                          code_revision, runner_class, runner_flags, runset,
                          cluster_name, state)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(id)
    .bind(&run.project_name)
    .bind(&run.scenario_name)
    .bind(&run.code_source.uri)
    .bind(run.code_source.kind.as_str())
    .bind(&run.code_source.revision)
    .bind(&run.runner_class)
    .bind(&run.runner_flags)
    .bind(&run.runset)
    .bind(&run.cluster_name)
    .bind(run.state().as_str())
    .execute(conn)
    .await?;

    Ok(())
}

/// Move the oldest matching scheduled run to `in_progress` and return it
///
/// Locked rows are skipped, so concurrent claimers each get a different run.
pub async fn claim_next(
    conn: &mut PgConnection,
    cluster_name: &str,
    run_ids: Option<&[RunId]>,
    runset: Option<&str>,
) -> Result<Option<RunRow>, sqlx::Error> {
    let query = format!(
        r#"
        WITH next_run AS (
            SELECT run_id
            FROM runs
            WHERE state = 'scheduled'
              AND cluster_name = $1
              AND ($2::BIGINT[] IS NULL OR run_id = ANY($2))
              AND ($3::TEXT IS NULL OR runset LIKE $3)
            ORDER BY run_id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE runs
        SET state = 'in_progress'
        WHERE run_id IN (SELECT run_id FROM next_run)
        RETURNING {}
        "#,
        RUN_COLUMNS
    );

    sqlx::query_as::<_, RunRow>(&query)
        .bind(cluster_name)
        .bind(run_ids)
        .bind(runset)
        .fetch_optional(conn)
        .await
}

/// Lock a run row and return its current state
pub async fn lock_state(
    conn: &mut PgConnection,
    id: RunId,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT state FROM runs WHERE run_id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Upsert the mutable fields of a run
pub async fn upsert(conn: &mut PgConnection, id: RunId, run: &Run) -> Result<(), sqlx::Error> {
    let output_path = run
        .output_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());

    sqlx::query(
        r#"
        INSERT INTO runs (run_id, project_name, scenario_name, code_uri, repo_kind,
                          code_revision, runner_class, runner_flags, runset,
                          cluster_name, state, hostname, host_ip, run_start_time,
                          run_end_time, output_host, output_path)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (run_id) DO UPDATE
        SET state = EXCLUDED.state,
            hostname = EXCLUDED.hostname,
            host_ip = EXCLUDED.host_ip,
            run_start_time = EXCLUDED.run_start_time,
            run_end_time = EXCLUDED.run_end_time,
            output_host = EXCLUDED.output_host,
            output_path = EXCLUDED.output_path
        "#,
    )
    .bind(id)
    .bind(&run.project_name)
    .bind(&run.scenario_name)
    .bind(&run.code_source.uri)
    .bind(run.code_source.kind.as_str())
    .bind(&run.code_source.revision)
    .bind(&run.runner_class)
    .bind(&run.runner_flags)
    .bind(&run.runset)
    .bind(&run.cluster_name)
    .bind(run.state().as_str())
    .bind(&run.hostname)
    .bind(&run.host_ip)
    .bind(run.start_time)
    .bind(run.end_time)
    .bind(&run.output_host)
    .bind(output_path)
    .execute(conn)
    .await?;

    Ok(())
}

/// Find runs matching a query, ordered by id
pub async fn find(conn: &mut PgConnection, query: &RunQuery) -> Result<Vec<RunRow>, sqlx::Error> {
    let states: Vec<&str> = query.states.iter().map(RunState::as_str).collect();
    let sql = format!(
        r#"
        SELECT {}
        FROM runs
        WHERE (cardinality($1::TEXT[]) = 0 OR state = ANY($1))
          AND ($2::TEXT IS NULL OR hostname = $2)
          AND ($3::TEXT IS NULL OR runset LIKE $3)
          AND ($4::BIGINT[] IS NULL OR run_id = ANY($4))
        ORDER BY run_id
        "#,
        RUN_COLUMNS
    );

    sqlx::query_as::<_, RunRow>(&sql)
        .bind(states)
        .bind(&query.hostname)
        .bind(&query.runset)
        .bind(&query.run_ids)
        .fetch_all(conn)
        .await
}

/// Find a run by ID
pub async fn find_by_id(conn: &mut PgConnection, id: RunId) -> Result<Option<RunRow>, sqlx::Error> {
    let sql = format!("SELECT {} FROM runs WHERE run_id = $1", RUN_COLUMNS);

    sqlx::query_as::<_, RunRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
pub struct RunRow {
    pub run_id: RunId,
    project_name: String,
    scenario_name: Option<String>,
    code_uri: String,
    repo_kind: String,
    code_revision: String,
    runner_class: String,
    runner_flags: String,
    runset: String,
    cluster_name: String,
    state: String,
    hostname: Option<String>,
    host_ip: Option<String>,
    run_start_time: Option<DateTime<Utc>>,
    run_end_time: Option<DateTime<Utc>>,
    output_host: Option<String>,
    output_path: Option<String>,
}

impl RunRow {
    /// Build the domain value, attaching its parameters
    pub fn into_run(self, parameters: Parameters) -> Result<Run, StoreError> {
        let state: RunState = self
            .state
            .parse()
            .map_err(|e: String| StoreError::corrupt(self.run_id, e))?;
        let kind: RepositoryKind = self
            .repo_kind
            .parse()
            .map_err(|e: sweep_core::ConfigError| StoreError::corrupt(self.run_id, e.to_string()))?;

        let mut run = Run::from(NewRun {
            project_name: self.project_name,
            scenario_name: self.scenario_name,
            code_source: CodeSource::new(self.code_uri, kind, self.code_revision),
            runner_class: self.runner_class,
            runner_flags: self.runner_flags,
            parameters,
            runset: self.runset,
            cluster_name: self.cluster_name,
        })
        .with_state(state);

        run.id = Some(self.run_id);
        run.hostname = self.hostname;
        run.host_ip = self.host_ip;
        run.start_time = self.run_start_time;
        run.end_time = self.run_end_time;
        run.output_host = self.output_host;
        run.output_path = self.output_path.map(PathBuf::from);
        Ok(run)
    }
}
