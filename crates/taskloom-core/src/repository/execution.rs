//! Execution repository trait definition.

use taskloom_types::error::RepositoryError;
use taskloom_types::execution::{Execution, ExecutionStatus, TaskResult};
use taskloom_types::workflow::WorkflowDefinition;
use uuid::Uuid;

/// Storage contract for workflow definitions, executions, and task results.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition by id.
    fn save_workflow(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load_workflow(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// All stored definitions, ordered by id.
    fn list_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Upsert the run-level fields of an execution. `execution.tasks` is
    /// ignored; task results are written through `save_task_result`.
    fn save_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load an execution together with its task results.
    fn load_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// Run-level records (without task results), newest first, optionally
    /// filtered by status.
    fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Delete an execution and its task results. Returns `true` if it existed.
    fn delete_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Task results
    // -----------------------------------------------------------------------

    /// Upsert one task result. Fails with `NotFound` if the execution does
    /// not exist.
    fn save_task_result(
        &self,
        execution_id: &Uuid,
        result: &TaskResult,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Task results in the order they were first saved.
    fn list_tasks_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TaskResult>, RepositoryError>> + Send;
}
