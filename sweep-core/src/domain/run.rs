//! Run domain types

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::domain::code_source::CodeSource;
use crate::domain::params::Parameters;
use crate::error::StateError;

/// Store-assigned run identifier
pub type RunId = i64;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W").expect("constant regex pattern is valid"));

/// Run lifecycle state
///
/// `scheduled -> in_progress -> completed -> copied`, with `completed -> copy_failed`
/// as the failure branch. A `copy_failed` run may be copied again but never
/// goes back to `scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Scheduled,
    InProgress,
    Completed,
    Copied,
    CopyFailed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Scheduled => "scheduled",
            RunState::InProgress => "in_progress",
            RunState::Completed => "completed",
            RunState::Copied => "copied",
            RunState::CopyFailed => "copy_failed",
        }
    }

    /// Whether a run in this state may move to `next`
    ///
    /// Staying in the same state is always allowed so persisting twice is harmless.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        *self == next
            || matches!(
                (self, next),
                (Scheduled, InProgress)
                    | (InProgress, Completed)
                    | (Completed, Copied)
                    | (Completed, CopyFailed)
                    | (CopyFailed, Copied)
            )
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunState::Scheduled),
            "in_progress" => Ok(RunState::InProgress),
            "completed" => Ok(RunState::Completed),
            "copied" => Ok(RunState::Copied),
            "copy_failed" => Ok(RunState::CopyFailed),
            other => Err(format!("unknown run state: {}", other)),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of a run before it is stored
///
/// Produced by the run factory; becomes a `scheduled` [`Run`] with no id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub project_name: String,
    pub scenario_name: Option<String>,
    pub code_source: CodeSource,
    pub runner_class: String,
    pub runner_flags: String,
    pub parameters: Parameters,
    pub runset: String,
    pub cluster_name: String,
}

/// Run execution record
///
/// Structure shared between the store (persists) and the worker (executes).
/// Only the store assigns ids; state only moves forward through [`Run::advance`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub id: Option<RunId>,
    pub project_name: String,
    pub scenario_name: Option<String>,
    pub code_source: CodeSource,
    pub runner_class: String,
    pub runner_flags: String,
    pub parameters: Parameters,
    pub runset: String,
    pub cluster_name: String,
    state: RunState,
    pub hostname: Option<String>,
    pub host_ip: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_host: Option<String>,
    pub output_path: Option<PathBuf>,
}

impl From<NewRun> for Run {
    fn from(new: NewRun) -> Self {
        Self {
            id: None,
            project_name: new.project_name,
            scenario_name: new.scenario_name,
            code_source: new.code_source,
            runner_class: new.runner_class,
            runner_flags: new.runner_flags,
            parameters: new.parameters,
            runset: new.runset,
            cluster_name: new.cluster_name,
            state: RunState::Scheduled,
            hostname: None,
            host_ip: None,
            start_time: None,
            end_time: None,
            output_host: None,
            output_path: None,
        }
    }
}

impl Run {
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Moves the run to `next`, rejecting backwards or skipping transitions
    pub fn advance(&mut self, next: RunState) -> Result<(), StateError> {
        if !self.state.can_advance_to(next) {
            return Err(StateError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Sets the state as read back from a store, without transition checks
    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = state;
        self
    }

    /// Human readable name, `project_runset_id[_scenario]`
    pub fn name(&self) -> String {
        let id = self.id.map_or_else(|| "unassigned".to_string(), |id| id.to_string());
        match &self.scenario_name {
            Some(scenario) => format!("{}_{}_{}_{}", self.project_name, self.runset, id, scenario),
            None => format!("{}_{}_{}", self.project_name, self.runset, id),
        }
    }

    /// Name of the run's output directory, with every non-word character
    /// replaced by an underscore
    pub fn directory_name(&self) -> String {
        NON_WORD.replace_all(&self.name(), "_").into_owned()
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Run[{} {}]", self.name(), self.state)
    }
}
