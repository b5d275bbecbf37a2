//! Lifecycle events broadcast by the orchestration engine.
//!
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::execution::ExecutionStatus;

/// Events emitted while an execution is driven to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: String,
    },

    /// A task was dispatched to the executor (first attempt or retry).
    TaskStarted {
        execution_id: Uuid,
        task_id: String,
        attempt: u32,
    },

    TaskCompleted {
        execution_id: Uuid,
        task_id: String,
        attempts: u32,
        duration_ms: u64,
    },

    TaskFailed {
        execution_id: Uuid,
        task_id: String,
        kind: ErrorKind,
        error: String,
        will_retry: bool,
    },

    /// A failed task is waiting out its backoff before the next attempt.
    TaskRetrying {
        execution_id: Uuid,
        task_id: String,
        next_attempt: u32,
        delay_ms: u64,
    },

    TaskSkipped {
        execution_id: Uuid,
        task_id: String,
    },

    CancellationRequested {
        execution_id: Uuid,
    },

    ExecutionFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
        duration_ms: u64,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::TaskStarted { execution_id, .. }
            | ExecutionEvent::TaskCompleted { execution_id, .. }
            | ExecutionEvent::TaskFailed { execution_id, .. }
            | ExecutionEvent::TaskRetrying { execution_id, .. }
            | ExecutionEvent::TaskSkipped { execution_id, .. }
            | ExecutionEvent::CancellationRequested { execution_id }
            | ExecutionEvent::ExecutionFinished { execution_id, .. } => *execution_id,
        }
    }
}
