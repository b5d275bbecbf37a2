//! Shared domain types for Taskloom.
//!
//! Workflow definitions, execution records, the task error taxonomy,
//! engine configuration and lifecycle events. Zero infrastructure
//! dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod workflow;
