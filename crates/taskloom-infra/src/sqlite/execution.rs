//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `taskloom-core` using sqlx with split
//! read/write pools. Definitions and execution variables are stored as JSON
//! documents; task results get one row each so the scheduler can checkpoint
//! a single task without rewriting the whole execution.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::Row;
use taskloom_core::repository::ExecutionRepository;
use taskloom_types::error::{ErrorKind, RepositoryError, TaskError};
use taskloom_types::execution::{Execution, ExecutionStatus, TaskResult, TaskStatus};
use taskloom_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionRepository`.
#[derive(Debug, Clone)]
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    workflow_id: String,
    status: String,
    variables: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            variables: row.try_get("variables")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        let status: ExecutionStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let variables: Map<String, Value> = serde_json::from_str(&self.variables)
            .map_err(|e| RepositoryError::Query(format!("invalid variables JSON: {e}")))?;

        Ok(Execution {
            id: parse_uuid(&self.id)?,
            workflow_id: self.workflow_id,
            status,
            variables,
            started_at: parse_optional_datetime(self.started_at.as_deref())?,
            completed_at: parse_optional_datetime(self.completed_at.as_deref())?,
            error: self.error,
            tasks: Vec::new(),
        })
    }
}

struct TaskResultRow {
    task_id: String,
    status: String,
    attempts: i64,
    output: Option<String>,
    error_kind: Option<String>,
    error_message: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TaskResultRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            task_id: row.try_get("task_id")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            output: row.try_get("output")?,
            error_kind: row.try_get("error_kind")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_result(self) -> Result<TaskResult, RepositoryError> {
        let status: TaskStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid task output: {e}")))
            })
            .transpose()?;
        let error = match self.error_kind {
            Some(kind) => {
                let kind: ErrorKind = kind.parse().map_err(RepositoryError::Query)?;
                Some(TaskError::new(kind, self.error_message.unwrap_or_default()))
            }
            None => None,
        };

        Ok(TaskResult {
            task_id: self.task_id,
            status,
            attempts: u32::try_from(self.attempts)
                .map_err(|_| RepositoryError::Query(format!("invalid attempts: {}", self.attempts)))?,
            output,
            error,
            started_at: parse_optional_datetime(self.started_at.as_deref())?,
            completed_at: parse_optional_datetime(self.completed_at.as_deref())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn parse_optional_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.map(parse_datetime).transpose()
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn save_workflow(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = to_json(def)?;
        let now = format_datetime(&Utc::now());

        sqlx::query(
            r#"INSERT INTO workflows (id, name, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&def.id)
        .bind(def.display_name())
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn load_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| {
            let json: String = row.try_get("definition").map_err(query_error)?;
            serde_json::from_str(&json)
                .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))
        })
        .transpose()
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM workflows ORDER BY id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut defs = Vec::with_capacity(rows.len());
        for row in &rows {
            let json: String = row.try_get("definition").map_err(query_error)?;
            defs.push(serde_json::from_str(&json).map_err(|e| {
                RepositoryError::Query(format!("invalid workflow definition JSON: {e}"))
            })?);
        }
        Ok(defs)
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let variables = to_json(&execution.variables)?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_id, status, variables, started_at, completed_at, error, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 variables = excluded.variables,
                 started_at = excluded.started_at,
                 completed_at = excluded.completed_at,
                 error = excluded.error"#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(&variables)
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.error)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn load_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut execution = ExecutionRow::from_row(&row)
            .map_err(query_error)?
            .into_execution()?;
        execution.tasks = self.list_tasks_for_execution(id).await?;
        Ok(Some(execution))
    }

    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<Execution>, RepositoryError> {
        // v7 ids sort by creation time, also as text
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM executions WHERE status = ? ORDER BY id DESC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM executions ORDER BY id DESC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_error)?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row).map_err(query_error)?;
            executions.push(r.into_execution()?);
        }
        Ok(executions)
    }

    async fn delete_execution(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        // task_results rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM executions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_task_result(
        &self,
        execution_id: &Uuid,
        result: &TaskResult,
    ) -> Result<(), RepositoryError> {
        let output = result.output.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO task_results
               (execution_id, task_id, status, attempts, output, error_kind, error_message,
                started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id, task_id) DO UPDATE SET
                 status = excluded.status,
                 attempts = excluded.attempts,
                 output = excluded.output,
                 error_kind = excluded.error_kind,
                 error_message = excluded.error_message,
                 started_at = excluded.started_at,
                 completed_at = excluded.completed_at"#,
        )
        .bind(execution_id.to_string())
        .bind(&result.task_id)
        .bind(result.status.as_str())
        .bind(i64::from(result.attempts))
        .bind(&output)
        .bind(result.error.as_ref().map(|e| e.kind.as_str()))
        .bind(result.error.as_ref().map(|e| e.message.as_str()))
        .bind(result.started_at.as_ref().map(format_datetime))
        .bind(result.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn list_tasks_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<TaskResult>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM task_results WHERE execution_id = ? ORDER BY rowid ASC")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = TaskResultRow::from_row(row).map_err(query_error)?;
            results.push(r.into_result()?);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
