//! Durable checkpoints for execution state.
//!
//! Wraps `ExecutionRepository` so the scheduler records every transition
//! through one place, with a trace line per write.

use std::sync::Arc;

use taskloom_types::error::RepositoryError;
use taskloom_types::execution::{Execution, TaskResult};
use uuid::Uuid;

use crate::repository::ExecutionRepository;

/// Persists task and run transitions before the scheduler moves on.
///
/// Generic over `R: ExecutionRepository` so it works with any storage
/// backend (SQLite, in-memory).
pub struct CheckpointManager<R: ExecutionRepository> {
    repo: Arc<R>,
}

impl<R: ExecutionRepository> CheckpointManager<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn task(&self, execution_id: Uuid, result: &TaskResult) -> Result<(), RepositoryError> {
        self.repo.save_task_result(&execution_id, result).await?;
        tracing::debug!(
            execution_id = %execution_id,
            task_id = %result.task_id,
            status = %result.status,
            attempts = result.attempts,
            "checkpoint: task"
        );
        Ok(())
    }

    pub async fn execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.repo.save_execution(execution).await?;
        tracing::debug!(
            execution_id = %execution.id,
            status = %execution.status,
            "checkpoint: execution"
        );
        Ok(())
    }
}
