//! Repository Module
//!
//! Data access layer for the Postgres store.
//! Each repository handles database operations for one table.

pub mod params;
pub mod run;
