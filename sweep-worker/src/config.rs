//! Worker configuration
//!
//! Defines all configurable parameters for a worker: store connection,
//! which runs to claim, concurrency, directories and copy retries.

use std::path::{Path, PathBuf};
use std::time::Duration;
use sweep_core::{ClaimFilter, RunId};

use tracing::info;

use crate::pipeline::RetryPolicy;

/// Store used when `DATABASE_URL` is not set
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/sweep";

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance
    pub worker_id: String,

    /// Postgres connection string
    pub database_url: String,

    /// Only runs scheduled for this cluster are claimed
    pub cluster_name: String,

    /// Optional `LIKE` pattern restricting claimed runsets
    pub runset_filter: Option<String>,

    /// Optional explicit list of run ids to claim
    pub run_ids: Option<Vec<RunId>>,

    /// How long to wait when no run is available
    pub poll_interval: Duration,

    /// Max runs executing at once
    pub max_parallel_runs: usize,

    /// Local directory run output is written to
    pub output_dir: PathBuf,

    /// Local directory model code is fetched into
    pub model_dir: PathBuf,

    /// Where finished output is copied; left in place when unset
    pub results_dir: Option<PathBuf>,

    /// Total copy attempts per run
    pub copy_retry_attempts: u32,

    /// Wait before the first copy retry, doubled on each further retry
    pub copy_retry_backoff: Duration,

    /// The worker stops claiming runs once this file exists
    pub stop_file: PathBuf,

    /// Name recorded on claimed runs
    pub hostname: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, database_url: String) -> Self {
        Self {
            worker_id,
            database_url,
            cluster_name: "default".to_string(),
            runset_filter: None,
            run_ids: None,
            poll_interval: Duration::from_secs(5),
            max_parallel_runs: 1,
            output_dir: PathBuf::from("./sweep/outputdata"),
            model_dir: PathBuf::from("./sweep/modelcode"),
            results_dir: None,
            copy_retry_attempts: 5,
            copy_retry_backoff: Duration::from_millis(1000),
            stop_file: PathBuf::from("stop.now"),
            hostname: local_hostname(),
        }
    }

    /// Loads and validates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DATABASE_URL (optional, default: postgres://localhost/sweep)
    /// - WORKER_ID (optional, default: random UUID)
    /// - CLUSTER_NAME (optional, default: "default")
    /// - RUNSET_FILTER (optional, LIKE pattern)
    /// - RUN_IDS (optional, comma-separated)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - MAX_PARALLEL_RUNS (optional, default: 1)
    /// - OUTPUT_DIR, MODEL_DIR, RESULTS_DIR (optional paths)
    /// - COPY_RETRY_ATTEMPTS (optional, default: 5)
    /// - COPY_RETRY_BACKOFF_MS (optional, default: 1000)
    /// - STOP_FILE (optional, default: stop.now)
    /// - HOSTNAME (optional, default: /etc/hostname)
    ///
    /// Only a missing `DATABASE_URL` falls back to its default. Malformed
    /// values and failed validation are errors.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`
    pub fn load<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("DATABASE_URL").is_none() {
            info!("DATABASE_URL not set, using {}", DEFAULT_DATABASE_URL);
        }
        let config = Self::from_lookup(|key| {
            lookup(key).or_else(|| {
                (key == "DATABASE_URL").then(|| DEFAULT_DATABASE_URL.to_string())
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads variables through `lookup` without validating; `DATABASE_URL` is required
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable not set"))?;

        let worker_id = lookup("WORKER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut config = Self::new(worker_id, database_url);

        if let Some(cluster_name) = lookup("CLUSTER_NAME") {
            config.cluster_name = cluster_name;
        }

        config.runset_filter = lookup("RUNSET_FILTER").filter(|s| !s.is_empty());

        if let Some(ids) = lookup("RUN_IDS") {
            config.run_ids = Some(parse_run_ids(&ids)?);
        }

        if let Some(secs) = lookup("POLL_INTERVAL").and_then(|s| s.parse::<u64>().ok()) {
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(max) = lookup("MAX_PARALLEL_RUNS").and_then(|s| s.parse::<usize>().ok()) {
            config.max_parallel_runs = max;
        }

        if let Some(dir) = lookup("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }

        config.results_dir = lookup("RESULTS_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        if let Some(attempts) = lookup("COPY_RETRY_ATTEMPTS").and_then(|s| s.parse::<u32>().ok()) {
            config.copy_retry_attempts = attempts;
        }

        if let Some(ms) = lookup("COPY_RETRY_BACKOFF_MS").and_then(|s| s.parse::<u64>().ok()) {
            config.copy_retry_backoff = Duration::from_millis(ms);
        }

        if let Some(file) = lookup("STOP_FILE") {
            config.stop_file = PathBuf::from(file);
        }

        if let Some(hostname) = lookup("HOSTNAME").filter(|s| !s.is_empty()) {
            config.hostname = hostname;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if self.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }

        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            anyhow::bail!("database_url must start with postgres:// or postgresql://");
        }

        if self.cluster_name.is_empty() {
            anyhow::bail!("cluster_name cannot be empty");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_parallel_runs == 0 {
            anyhow::bail!("max_parallel_runs must be greater than 0");
        }

        if self.copy_retry_attempts == 0 {
            anyhow::bail!("copy_retry_attempts must be greater than 0");
        }

        Ok(())
    }

    /// Which runs this worker may claim
    pub fn claim_filter(&self) -> ClaimFilter {
        ClaimFilter {
            run_ids: self.run_ids.clone(),
            runset: self.runset_filter.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.copy_retry_attempts, self.copy_retry_backoff)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            DEFAULT_DATABASE_URL.to_string(),
        )
    }
}

fn parse_run_ids(value: &str) -> anyhow::Result<Vec<RunId>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<RunId>()
                .map_err(|_| anyhow::anyhow!("RUN_IDS contains an invalid id: {}", s))
        })
        .collect()
}

/// Name of this machine, from `/etc/hostname` when available
pub fn local_hostname() -> String {
    read_hostname(Path::new("/etc/hostname")).unwrap_or_else(|| "localhost".to_string())
}

fn read_hostname(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_parallel_runs, 1);
        assert_eq!(config.cluster_name, "default");
        assert_eq!(config.copy_retry_attempts, 5);
        assert!(config.results_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Empty worker_id should fail
        config.worker_id = String::new();
        assert!(config.validate().is_err());

        config.worker_id = "test".to_string();

        // Invalid URL should fail
        config.database_url = "mysql://localhost".to_string();
        assert!(config.validate().is_err());

        config.database_url = "postgresql://localhost/sweep".to_string();
        assert!(config.validate().is_ok());

        config.max_parallel_runs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_requires_database_url() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/sweep"),
            ("WORKER_ID", "w-1"),
            ("CLUSTER_NAME", "gpu"),
            ("RUNSET_FILTER", "nightly%"),
            ("RUN_IDS", "3, 5,8"),
            ("POLL_INTERVAL", "2"),
            ("MAX_PARALLEL_RUNS", "4"),
            ("RESULTS_DIR", "/mnt/results"),
            ("COPY_RETRY_BACKOFF_MS", "10"),
            ("HOSTNAME", "node-7"),
        ]))
        .unwrap();

        assert_eq!(config.worker_id, "w-1");
        assert_eq!(config.cluster_name, "gpu");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_parallel_runs, 4);
        assert_eq!(config.results_dir, Some(PathBuf::from("/mnt/results")));
        assert_eq!(config.copy_retry_backoff, Duration::from_millis(10));
        assert_eq!(config.hostname, "node-7");

        let filter = config.claim_filter();
        assert_eq!(filter.run_ids, Some(vec![3, 5, 8]));
        assert_eq!(filter.runset.as_deref(), Some("nightly%"));
    }

    #[test]
    fn test_invalid_run_ids() {
        let result = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/sweep"),
            ("RUN_IDS", "1,two"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_defaults_database_url_only() {
        let config = Config::load(lookup(&[("CLUSTER_NAME", "gpu")])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.cluster_name, "gpu");
    }

    #[test]
    fn test_load_keeps_given_settings_or_fails() {
        let config = Config::load(lookup(&[
            ("DATABASE_URL", "postgres://prod-db/sweep"),
            ("CLUSTER_NAME", "gpu"),
            ("RUN_IDS", "1,2"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "postgres://prod-db/sweep");
        assert_eq!(config.run_ids, Some(vec![1, 2]));

        let result = Config::load(lookup(&[
            ("DATABASE_URL", "postgres://prod-db/sweep"),
            ("CLUSTER_NAME", "gpu"),
            ("RUN_IDS", "1,two"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let result = Config::load(lookup(&[
            ("DATABASE_URL", "postgres://prod-db/sweep"),
            ("MAX_PARALLEL_RUNS", "0"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_read_hostname_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostname");
        std::fs::write(&path, "box-1\n").unwrap();

        assert_eq!(read_hostname(&path), Some("box-1".to_string()));
        assert_eq!(read_hostname(&dir.path().join("missing")), None);
    }
}
