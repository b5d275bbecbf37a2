//! Repository trait definitions (ports).
//!
//! `ExecutionRepository` is the storage contract the engine persists every
//! state transition through. The infrastructure layer (taskloom-infra)
//! implements it with SQLite; `memory` provides a process-local backend.

pub mod execution;
pub mod memory;

pub use execution::ExecutionRepository;
pub use memory::InMemoryExecutionRepository;
