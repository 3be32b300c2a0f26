//! Error types for Sweep
//!
//! Each failure category gets its own type so callers can tell "retry the
//! operation" apart from "abandon this run" and "abort the process". Only
//! `ConfigError` and `StoreError` are meant to escape to the process level;
//! execution and copy failures are captured into run state.

use thiserror::Error;

use crate::domain::run::{RunId, RunState};

/// Malformed generator, parameter or project configuration.
///
/// Raised at construction time and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Generator type name is not one of the known variants
    #[error("Unknown generator type: {0}")]
    UnknownGenerator(String),

    /// A generator argument is missing or out of range
    #[error("Invalid generator '{key}': {message}")]
    InvalidGenerator {
        /// Key the generator assigns values to
        key: String,
        /// What was wrong with it
        message: String,
    },

    /// Two generators assign values to the same key
    #[error("Duplicate generator key: {0}")]
    DuplicateGeneratorKey(String),

    /// Repository kind name is not recognised
    #[error("Unknown repository kind: {0}")]
    UnknownRepositoryKind(String),

    /// Project spec failed validation
    #[error("Invalid project spec: {0}")]
    InvalidProject(String),
}

/// Backing store failure.
///
/// Surfaced to the scheduling loop, which may retry the whole operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity or query failure in the backing store
    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The run has not been assigned an id by `insert_runs` yet
    #[error("Run has no assigned id: {0}")]
    UnassignedId(String),

    /// No run with this id exists
    #[error("Run not found: {0}")]
    NotFound(RunId),

    /// The stored state cannot move to the requested one
    #[error("Rejected update of run {run_id}: {source}")]
    IllegalTransition {
        /// Run being persisted
        run_id: RunId,
        /// The rejected transition
        #[source]
        source: StateError,
    },

    /// A persisted row could not be turned back into a domain value
    #[error("Corrupt row for run {run_id}: {message}")]
    Corrupt {
        /// Run the row belongs to
        run_id: RunId,
        /// What could not be decoded
        message: String,
    },
}

impl StoreError {
    /// Wraps any backend error
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }

    /// Builds a corrupt-row error
    pub fn corrupt(run_id: RunId, message: impl Into<String>) -> Self {
        Self::Corrupt {
            run_id,
            message: message.into(),
        }
    }
}

/// Model execution failure.
///
/// Recorded through the `.failed` output directory and never escalated.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// No runner is registered under this identifier
    #[error("Unknown runner: {0}")]
    UnknownRunner(String),

    /// The model code could not be made available locally
    #[error("Failed to resolve code from {uri}: {message}")]
    CodeResolution {
        /// Where the code was supposed to come from
        uri: String,
        /// Why it could not be fetched
        message: String,
    },

    /// Filesystem failure while preparing or finalising the sandbox
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The runner itself reported an error
    #[error("Runner failed: {0}")]
    Runner(String),
}

/// Results transport failure.
///
/// Retried with bounded attempts, then recorded as `copy_failed`.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Filesystem failure while copying
    #[error("I/O error copying results: {0}")]
    Io(#[from] std::io::Error),

    /// The output directory to copy does not exist
    #[error("Source path is not a directory: {0}")]
    MissingSource(String),

    /// Transport-specific failure
    #[error("Transport failed: {0}")]
    Transport(String),
}

/// An illegal lifecycle transition was requested.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Illegal run state transition: {from} -> {to}")]
pub struct StateError {
    /// State the run was in
    pub from: RunState,
    /// State that was requested
    pub to: RunState,
}
