//! Process-local `ExecutionRepository` backed by `DashMap`.
//!
//! Used by tests and by callers that do not need durability. Clones share
//! the same underlying maps.

use std::sync::Arc;

use dashmap::DashMap;
use taskloom_types::error::RepositoryError;
use taskloom_types::execution::{Execution, ExecutionStatus, TaskResult};
use taskloom_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::execution::ExecutionRepository;

#[derive(Debug, Clone)]
struct StoredExecution {
    run: Execution,
    tasks: Vec<TaskResult>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionRepository {
    workflows: Arc<DashMap<String, WorkflowDefinition>>,
    executions: Arc<DashMap<Uuid, StoredExecution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save_workflow(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.workflows.insert(def.id.clone(), def.clone());
        Ok(())
    }

    async fn load_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.workflows.get(id).map(|d| d.clone()))
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<_> = self.workflows.iter().map(|d| d.value().clone()).collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(defs)
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut run = execution.clone();
        run.tasks.clear();
        self.executions
            .entry(execution.id)
            .and_modify(|stored| stored.run = run.clone())
            .or_insert_with(|| StoredExecution {
                run,
                tasks: Vec::new(),
            });
        Ok(())
    }

    async fn load_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.get(id).map(|stored| {
            let mut execution = stored.run.clone();
            execution.tasks = stored.tasks.clone();
            execution
        }))
    }

    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut runs: Vec<Execution> = self
            .executions
            .iter()
            .map(|stored| stored.run.clone())
            .filter(|run| status.is_none_or(|s| run.status == s))
            .collect();
        // v7 ids sort by creation time
        runs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(runs)
    }

    async fn delete_execution(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.executions.remove(id).is_some())
    }

    async fn save_task_result(
        &self,
        execution_id: &Uuid,
        result: &TaskResult,
    ) -> Result<(), RepositoryError> {
        let mut stored = self
            .executions
            .get_mut(execution_id)
            .ok_or(RepositoryError::NotFound)?;
        match stored.tasks.iter_mut().find(|t| t.task_id == result.task_id) {
            Some(existing) => *existing = result.clone(),
            None => stored.tasks.push(result.clone()),
        }
        Ok(())
    }

    async fn list_tasks_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<TaskResult>, RepositoryError> {
        Ok(self
            .executions
            .get(execution_id)
            .map(|stored| stored.tasks.clone())
            .unwrap_or_default())
    }
}
