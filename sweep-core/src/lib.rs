//! Sweep Core
//!
//! Core types and abstractions for the Sweep run coordinator.
//!
//! This crate contains:
//! - Domain types: parameters, runs, code sources and project specs
//! - Parameter space expansion: static repetitions and value generators
//! - Run factory: turns a project spec into concrete run definitions
//! - The `RunStore` contract implemented by the persistence crate
//! - The error taxonomy shared by every other crate

pub mod domain;
pub mod error;
pub mod factory;
pub mod space;
pub mod store;

pub use domain::code_source::{CodeSource, RepositoryKind};
pub use domain::params::{ParamValue, Parameters};
pub use domain::project::{ProjectSpec, Scenario};
pub use domain::run::{NewRun, Run, RunId, RunState};
pub use error::{ConfigError, CopyError, ExecutionError, StateError, StoreError};
pub use factory::RunFactory;
pub use space::{GeneratorSpec, RepetitionGenerator, Repetitions, expand};
pub use store::{ClaimFilter, RunQuery, RunStore, StoreResult};
