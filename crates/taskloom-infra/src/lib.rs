//! Infrastructure layer for Taskloom.
//!
//! Contains implementations of the ports defined in `taskloom-core`: the
//! SQLite `ExecutionRepository`, an HTTP `TaskExecutor` for networked
//! executors, and the `config.toml` loader.

pub mod config;
pub mod executor;
pub mod sqlite;
