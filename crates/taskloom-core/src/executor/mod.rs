//! The task executor port.
//!
//! The engine never performs task work itself: every dispatch goes through a
//! `TaskExecutor`, which returns the task output or a failure that the retry
//! classifier turns into an `ErrorKind`.

pub mod box_executor;

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use taskloom_types::error::ErrorKind;
use taskloom_types::workflow::Parameters;
use thiserror::Error;
use uuid::Uuid;

pub use box_executor::{BoxTaskExecutor, TaskExecutorDyn};

/// A single dispatch of a task, with placeholders already resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRequest {
    pub execution_id: Uuid,
    pub task_id: String,
    pub agent_type: String,
    pub action: String,
    pub parameters: Parameters,
    /// Deadline the engine enforces around this dispatch.
    #[serde(rename = "timeout_ms", serialize_with = "serialize_millis")]
    pub timeout: Duration,
    /// 1-based attempt number.
    pub attempt: u32,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// A failed dispatch as reported by the executor.
///
/// `kind` is an optional hint; when absent the classifier falls back to
/// pattern matching on `message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutorFailure {
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl ExecutorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
        }
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            message: message.into(),
        }
    }
}

/// Performs the actual work of a task (browser automation, HTTP calls, ...).
///
/// Uses RPITIT; wrap implementations in [`BoxTaskExecutor`] for dynamic
/// dispatch. Implementations must be safe to call concurrently and should
/// honour `request.timeout` where they can; the engine enforces it anyway.
pub trait TaskExecutor: Send + Sync {
    fn execute(
        &self,
        request: &TaskRequest,
    ) -> impl Future<Output = Result<Value, ExecutorFailure>> + Send;
}
