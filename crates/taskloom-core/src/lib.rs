//! Orchestration engine and repository trait definitions for Taskloom.
//!
//! This crate defines the "ports" (the `TaskExecutor` capability and the
//! `ExecutionRepository` storage contract) that the infrastructure layer
//! implements. It depends only on `taskloom-types` -- never on
//! `taskloom-infra` or any database/IO crate.

pub mod event;
pub mod executor;
pub mod metrics;
pub mod repository;
pub mod workflow;
