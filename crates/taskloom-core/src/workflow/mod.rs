//! Workflow engine core: definitions, dependency graph, resolution, retries,
//! scheduling, and the execution lifecycle.
//!
//! - `definition` -- YAML parsing and structural validation
//! - `dag` -- dependency graph, cycle detection, traversal
//! - `resolver` -- `${task.path}` placeholder resolution
//! - `retry` -- failure classification and the retry strategy table
//! - `checkpoint` -- persistence of every state transition
//! - `scheduler` -- event-driven execution of one run
//! - `engine` -- lifecycle, registry, and limits across runs
//! - `templates` -- built-in workflow definitions

pub mod checkpoint;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod templates;

pub use definition::WorkflowError;
pub use engine::{Engine, EngineError};
pub use retry::{RetryClassifier, RetryDecision, RetryPolicy};
