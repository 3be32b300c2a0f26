//! Project specification types
//!
//! Parsing these from text is left to the embedder; everything here is
//! plain data plus validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::params::Parameters;
use crate::error::ConfigError;
use crate::space::Repetitions;

/// Named parameter override set applied on top of the base parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: String,
    pub parameters: Parameters,
}

impl Scenario {
    pub fn new(name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

/// Everything needed to create the runs of one project
#[derive(Debug, Clone)]
pub struct ProjectSpec {
    pub project_name: String,
    pub runner_class: String,
    pub runner_flags: String,
    pub base_parameters: Parameters,
    pub scenarios: Vec<Scenario>,
    pub repetitions: Repetitions,
}

impl ProjectSpec {
    /// Creates a spec with no scenarios and a single empty repetition
    pub fn new(project_name: impl Into<String>, runner_class: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            runner_class: runner_class.into(),
            runner_flags: String::new(),
            base_parameters: Parameters::new(),
            scenarios: Vec::new(),
            repetitions: Repetitions::default(),
        }
    }

    pub fn with_runner_flags(mut self, flags: impl Into<String>) -> Self {
        self.runner_flags = flags.into();
        self
    }

    pub fn with_base_parameters(mut self, parameters: Parameters) -> Self {
        self.base_parameters = parameters;
        self
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn with_repetitions(mut self, repetitions: Repetitions) -> Self {
        self.repetitions = repetitions;
        self
    }

    /// Checks the spec is usable for run creation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::InvalidProject(
                "project_name cannot be empty".to_string(),
            ));
        }
        if self.runner_class.trim().is_empty() {
            return Err(ConfigError::InvalidProject(
                "runner_class cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if !seen.insert(scenario.name.as_str()) {
                return Err(ConfigError::InvalidProject(format!(
                    "duplicate scenario name: {}",
                    scenario.name
                )));
            }
        }

        Ok(())
    }
}
