//! Sweep worker
//!
//! Claims scheduled runs from a shared run store, executes each one in an
//! isolated output directory and ships the output through the results
//! pipeline, which records the final state back in the store.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Code: resolves a run's code source to a local model directory
//! - Runners: named model runners (`null`, `command`, or embedder supplied)
//! - Sandbox: per-run output directories, parameters file and status renames
//! - Pipeline: queued, retried copy of results with state write-back
//! - Scheduler: claim loop bounded by a concurrency limit

pub mod code;
pub mod config;
pub mod pipeline;
pub mod runners;
pub mod sandbox;
pub mod scheduler;
pub mod stop;

pub use config::Config;
pub use pipeline::{PipelineBuilder, ResultsPipeline};
pub use sandbox::{ExecutionOutcome, ExecutionSandbox};
pub use scheduler::RunPoller;
pub use stop::StopRun;
