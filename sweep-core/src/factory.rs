//! Run factory
//!
//! Combines a project's base parameters, its scenarios and its parameter
//! space into the full batch of run definitions. Never touches the store.

use tracing::info;

use crate::domain::code_source::CodeSource;
use crate::domain::params::Parameters;
use crate::domain::project::ProjectSpec;
use crate::domain::run::{NewRun, Run};

/// Creates the runs of one batch
#[derive(Debug, Clone)]
pub struct RunFactory {
    code_source: CodeSource,
    runset: String,
    cluster_name: String,
    global_parameters: Parameters,
}

impl RunFactory {
    pub fn new(
        code_source: CodeSource,
        runset: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            code_source,
            runset: runset.into(),
            cluster_name: cluster_name.into(),
            global_parameters: Parameters::new(),
        }
    }

    /// Parameters applied beneath every project's base parameters
    pub fn with_global_parameters(mut self, parameters: Parameters) -> Self {
        self.global_parameters = parameters;
        self
    }

    /// Creates `copies * |parameter space| * max(1, |scenarios|)` scheduled runs
    ///
    /// Precedence, lowest first: global, base, scenario, repetition.
    pub fn create_runs(&self, project: &ProjectSpec, copies: usize) -> Vec<Run> {
        let base = self.global_parameters.merge(&project.base_parameters);
        let space = project.repetitions.params_list();

        let mut runs = Vec::with_capacity(copies * space.len() * project.scenarios.len().max(1));
        for _ in 0..copies {
            for repetition in &space {
                if project.scenarios.is_empty() {
                    runs.push(self.new_run(project, None, base.merge(repetition)));
                } else {
                    for scenario in &project.scenarios {
                        let params = base.merge(&scenario.parameters).merge(repetition);
                        runs.push(self.new_run(project, Some(scenario.name.clone()), params));
                    }
                }
            }
        }

        info!(
            project = %project.project_name,
            runset = %self.runset,
            count = runs.len(),
            "Created runs"
        );
        runs
    }

    fn new_run(
        &self,
        project: &ProjectSpec,
        scenario_name: Option<String>,
        parameters: Parameters,
    ) -> Run {
        Run::from(NewRun {
            project_name: project.project_name.clone(),
            scenario_name,
            code_source: self.code_source.clone(),
            runner_class: project.runner_class.clone(),
            runner_flags: project.runner_flags.clone(),
            parameters,
            runset: self.runset.clone(),
            cluster_name: self.cluster_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::ParamValue;
    use crate::domain::project::Scenario;
    use crate::domain::run::RunState;
    use crate::space::{RepetitionGenerator, Repetitions};
    use rust_decimal::Decimal;

    fn factory() -> RunFactory {
        RunFactory::new(CodeSource::local("/models/m"), "batch", "default")
    }

    fn project() -> ProjectSpec {
        ProjectSpec::new("proj", "null")
            .with_runner_flags("--fast")
            .with_base_parameters(Parameters::from_iter([("a", 1), ("b", 1), ("c", 1)]))
    }

    #[test]
    fn test_no_scenarios_one_run_per_copy() {
        let runs = factory().create_runs(&project(), 3);

        assert_eq!(runs.len(), 3);
        for run in &runs {
            assert_eq!(run.state(), RunState::Scheduled);
            assert!(run.id.is_none());
            assert!(run.scenario_name.is_none());
            assert_eq!(run.runner_flags, "--fast");
            assert_eq!(run.runset, "batch");
            assert_eq!(run.cluster_name, "default");
        }
    }

    #[test]
    fn test_run_count() {
        let repetitions = Repetitions::new(
            vec![
                Parameters::from_iter([("r", 1)]),
                Parameters::from_iter([("r", 2)]),
            ],
            vec![
                RepetitionGenerator::linear_step("g", Decimal::ZERO, Decimal::ONE, 3).unwrap(),
            ],
        )
        .unwrap();
        let project = project()
            .with_repetitions(repetitions)
            .with_scenario(Scenario::new("s1", Parameters::new()))
            .with_scenario(Scenario::new("s2", Parameters::new()));

        let runs = factory().create_runs(&project, 2);

        assert_eq!(runs.len(), 2 * 6 * 2);
    }

    #[test]
    fn test_zero_copies() {
        assert!(factory().create_runs(&project(), 0).is_empty());
    }

    #[test]
    fn test_parameter_precedence() {
        let project = project()
            .with_scenario(Scenario::new(
                "s1",
                Parameters::from_iter([("b", 2), ("c", 2)]),
            ))
            .with_repetitions(Repetitions::from_statics(vec![Parameters::from_iter([(
                "c", 3,
            )])]));
        let factory = factory().with_global_parameters(Parameters::from_iter([("a", 0), ("g", 0)]));

        let runs = factory.create_runs(&project, 1);

        assert_eq!(runs.len(), 1);
        let params = &runs[0].parameters;
        assert_eq!(params.get("g"), Some(&ParamValue::Int(0)));
        assert_eq!(params.get("a"), Some(&ParamValue::Int(1)));
        assert_eq!(params.get("b"), Some(&ParamValue::Int(2)));
        assert_eq!(params.get("c"), Some(&ParamValue::Int(3)));
        assert_eq!(runs[0].scenario_name.as_deref(), Some("s1"));
    }
}
