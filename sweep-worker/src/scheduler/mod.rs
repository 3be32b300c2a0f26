//! Scheduler layer for the worker
//!
//! Claims runs from the store, executes them in the sandbox and hands their
//! output to the results pipeline, up to a fixed number of runs at once.

pub mod poller;

pub use poller::RunPoller;
