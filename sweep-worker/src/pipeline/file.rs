//! Terminal copiers for a local or mounted filesystem

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sweep_core::{CopyError, Run};
use tracing::info;
use walkdir::WalkDir;

use super::{CopyOutcome, ResultsCopier};

/// Copies output into `<dest_dir>/<output directory name>`
#[derive(Debug, Clone)]
pub struct FileCopier {
    dest_dir: PathBuf,
    hostname: String,
}

impl FileCopier {
    /// `hostname` is recorded as the output host of copied runs
    pub fn new(dest_dir: impl Into<PathBuf>, hostname: impl Into<String>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            hostname: hostname.into(),
        }
    }
}

#[async_trait]
impl ResultsCopier for FileCopier {
    async fn copy(
        &self,
        run: &Run,
        source: &Path,
        _success: bool,
    ) -> Result<CopyOutcome, CopyError> {
        let name = source
            .file_name()
            .ok_or_else(|| CopyError::MissingSource(source.display().to_string()))?;
        let dest = self.dest_dir.join(name);

        info!(
            run_id = ?run.id,
            "Copying results from {} to {}",
            source.display(),
            dest.display()
        );

        let from = source.to_path_buf();
        let to = dest.clone();
        tokio::task::spawn_blocking(move || copy_dir(&from, &to))
            .await
            .map_err(|e| CopyError::Transport(format!("copy task failed: {}", e)))??;

        Ok(CopyOutcome {
            output_host: self.hostname.clone(),
            output_path: dest,
        })
    }
}

fn copy_dir(source: &Path, dest: &Path) -> Result<(), CopyError> {
    if !source.is_dir() {
        return Err(CopyError::MissingSource(source.display().to_string()));
    }
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| CopyError::Transport(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| CopyError::Transport(e.to_string()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Leaves output where it is, recording it in place
#[derive(Debug, Clone)]
pub struct NoopCopier {
    hostname: String,
}

impl NoopCopier {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }
}

#[async_trait]
impl ResultsCopier for NoopCopier {
    async fn copy(
        &self,
        _run: &Run,
        source: &Path,
        _success: bool,
    ) -> Result<CopyOutcome, CopyError> {
        Ok(CopyOutcome {
            output_host: self.hostname.clone(),
            output_path: source.to_path_buf(),
        })
    }
}
