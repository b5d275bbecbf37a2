//! Observability setup for Taskloom binaries.

pub mod tracing_setup;
