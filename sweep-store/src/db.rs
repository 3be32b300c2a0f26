use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Creates the schema if it does not exist yet
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Run ids come from this sequence in contiguous blocks
    sqlx::query("CREATE SEQUENCE IF NOT EXISTS runs_run_id_seq")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id BIGINT PRIMARY KEY,
            project_name TEXT NOT NULL,
            scenario_name TEXT,
            code_uri TEXT NOT NULL,
            repo_kind VARCHAR(32) NOT NULL,
            code_revision TEXT NOT NULL DEFAULT '',
            runner_class TEXT NOT NULL,
            runner_flags TEXT NOT NULL DEFAULT '',
            runset TEXT NOT NULL,
            cluster_name TEXT NOT NULL,
            state VARCHAR(32) NOT NULL,
            hostname TEXT,
            host_ip TEXT,
            run_start_time TIMESTAMPTZ,
            run_end_time TIMESTAMPTZ,
            output_host TEXT,
            output_path TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_params (
            run_id BIGINT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
            param_name TEXT NOT NULL,
            param_value TEXT NOT NULL,
            data_type VARCHAR(8) NOT NULL,
            PRIMARY KEY (run_id, param_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Claim scans scheduled runs of one cluster in id order
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_claim ON runs(state, cluster_name, run_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_runset ON runs(runset)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
