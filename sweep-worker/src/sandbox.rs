//! Execution sandbox
//!
//! Gives each run its own output directory and invokes its runner. The
//! directory is named after the run with a suffix that records progress:
//! `<name>.inprogress` while running, `<name>` on success and `<name>.failed`
//! on failure, so run status can be recovered from disk alone.

use std::collections::HashMap;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;
use sweep_core::{ExecutionError, Run};
use tracing::{error, info, warn};

use crate::code::CodeResolver;
use crate::runners::{RunContext, RunnerRegistry};
use crate::stop::StopRun;

const INPROGRESS_SUFFIX: &str = ".inprogress";
const FAILED_SUFFIX: &str = ".failed";
const METADATA_DIR: &str = "metadata";
const PARAMETERS_FILE: &str = "parameters.json";

/// What happened to one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Final output directory, after the status rename
    pub output_path: PathBuf,
}

/// Runs models in isolated output directories
pub struct ExecutionSandbox {
    output_dir: PathBuf,
    resolver: Arc<CodeResolver>,
    runners: Arc<RunnerRegistry>,
}

impl ExecutionSandbox {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        resolver: Arc<CodeResolver>,
        runners: Arc<RunnerRegistry>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            resolver,
            runners,
        }
    }

    /// Output directory of a successful run
    pub fn output_path(&self, run: &Run) -> PathBuf {
        self.output_dir.join(run.directory_name())
    }

    /// Executes the run, never failing: every error becomes an unsuccessful outcome
    pub async fn execute(&self, run: &Run, stop: &StopRun) -> ExecutionOutcome {
        let base = self.output_path(run);
        let working = with_suffix(&base, INPROGRESS_SUFFIX);

        let success = match self.run_in(run, &working, stop).await {
            Ok(success) => success,
            Err(e) => {
                error!(run_id = ?run.id, "Error executing run: {}", e);
                false
            }
        };
        stop.reset();

        let output_path = if success {
            base
        } else {
            with_suffix(&base, FAILED_SUFFIX)
        };
        if let Err(e) = finalize(&working, &output_path).await {
            error!(
                run_id = ?run.id,
                "Failed to rename {} to {}: {}",
                working.display(),
                output_path.display(),
                e
            );
        }

        if success {
            info!(run_id = ?run.id, output = %output_path.display(), "Run succeeded");
        } else {
            warn!(run_id = ?run.id, output = %output_path.display(), "Run failed");
        }

        ExecutionOutcome {
            success,
            output_path,
        }
    }

    async fn run_in(
        &self,
        run: &Run,
        working: &Path,
        stop: &StopRun,
    ) -> Result<bool, ExecutionError> {
        let run_id = run
            .id
            .ok_or_else(|| ExecutionError::Runner("run has no id".to_string()))?;
        let runner = self.runners.create(&run.runner_class)?;
        let model_path = self.resolver.resolve(&run.code_source).await?;

        remove_stale(working).await?;
        let metadata_path = working.join(METADATA_DIR);
        tokio::fs::create_dir_all(&metadata_path).await?;

        let wildcards = HashMap::from([
            ("run_id".to_string(), run_id.to_string()),
            ("model_path".to_string(), dir_wildcard(&model_path)),
            ("output_path".to_string(), dir_wildcard(working)),
            ("output_metadata_path".to_string(), dir_wildcard(&metadata_path)),
            ("runset".to_string(), run.runset.clone()),
        ]);
        let parameters = run.parameters.replace_wildcards(&wildcards);

        let parameters_file = metadata_path.join(PARAMETERS_FILE);
        let json = serde_json::to_vec_pretty(&parameters.to_json())
            .map_err(|e| ExecutionError::Runner(format!("failed to encode parameters: {}", e)))?;
        tokio::fs::write(&parameters_file, json).await?;

        info!(
            run_id,
            project = %run.project_name,
            scenario = run.scenario_name.as_deref().unwrap_or("-"),
            runner = %run.runner_class,
            model = %model_path.display(),
            flags = %run.runner_flags,
            "Running model"
        );

        runner
            .run(RunContext {
                model_path: &model_path,
                output_path: working,
                parameters_file: &parameters_file,
                run_id,
                flags: &run.runner_flags,
                parameters: &parameters,
                stop,
            })
            .await
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Absolute directory path with a trailing separator, for string concatenation in parameters
fn dir_wildcard(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut value = absolute.to_string_lossy().into_owned();
    if !value.ends_with(MAIN_SEPARATOR) {
        value.push(MAIN_SEPARATOR);
    }
    value
}

async fn remove_stale(path: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(path).await? {
        warn!("Output path {} already exists. Deleting.", path.display());
        tokio::fs::remove_dir_all(path).await?;
    }
    Ok(())
}

async fn finalize(working: &Path, destination: &Path) -> std::io::Result<()> {
    remove_stale(destination).await?;
    if !tokio::fs::try_exists(working).await? {
        // nothing was created, leave an empty marker directory
        return tokio::fs::create_dir_all(destination).await;
    }
    tokio::fs::rename(working, destination).await
}
