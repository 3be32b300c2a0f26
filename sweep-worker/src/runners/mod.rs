//! Model runners
//!
//! A runner executes model code for one run. Runners are looked up by name
//! in a [`RunnerRegistry`] populated at startup.

mod command;
mod null;

pub use command::CommandRunner;
pub use null::NullRunner;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use sweep_core::{ExecutionError, Parameters, RunId};

use crate::stop::StopRun;

/// Everything a runner gets to see about the run it executes
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Local directory holding the model code
    pub model_path: &'a Path,
    /// Directory the model writes its output to
    pub output_path: &'a Path,
    /// JSON file holding `parameters`
    pub parameters_file: &'a Path,
    pub run_id: RunId,
    pub flags: &'a str,
    /// Parameters with runtime wildcards already substituted
    pub parameters: &'a Parameters,
    /// Runners that can be interrupted register a stop task here
    pub stop: &'a StopRun,
}

/// Runs a model
#[async_trait]
pub trait ModelRunner: Send + Sync {
    /// Returns whether the model succeeded
    async fn run(&self, ctx: RunContext<'_>) -> Result<bool, ExecutionError>;
}

/// Creates a runner instance
pub type RunnerFactory = Arc<dyn Fn() -> Arc<dyn ModelRunner> + Send + Sync>;

/// Maps runner names to factories
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    factories: HashMap<String, RunnerFactory>,
}

impl RunnerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `null` and `command` runners
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("null", Arc::new(|| Arc::new(NullRunner) as Arc<dyn ModelRunner>));
        registry.register(
            "command",
            Arc::new(|| Arc::new(CommandRunner) as Arc<dyn ModelRunner>),
        );
        registry
    }

    /// Adds or replaces a runner
    pub fn register(&mut self, name: impl Into<String>, factory: RunnerFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn ModelRunner>, ExecutionError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ExecutionError::UnknownRunner(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
