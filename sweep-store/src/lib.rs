//! Sweep Store
//!
//! `RunStore` implementations: Postgres for shared deployments and an
//! in-memory store for local runs and tests.

pub mod db;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use memory::MemoryRunStore;
pub use postgres::PgRunStore;
