//! Core domain types
//!
//! These types are shared between the persistence crate (which stores them)
//! and the worker (which executes and reconciles them).

pub mod code_source;
pub mod params;
pub mod project;
pub mod run;
