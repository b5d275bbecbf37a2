use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure kind.
///
/// The first six originate from task execution and drive the retry
/// strategy table. `NotFound` and `Conflict` only ever come from the
/// engine's own contract and are never attached to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ElementNotFound,
    Timeout,
    NetworkError,
    NotActionable,
    ValidationError,
    ResourceExhausted,
    NotFound,
    Conflict,
    Default,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ElementNotFound => "element_not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::NotActionable => "not_actionable",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Default => "default",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "element_not_found" => Ok(ErrorKind::ElementNotFound),
            "timeout" => Ok(ErrorKind::Timeout),
            "network_error" => Ok(ErrorKind::NetworkError),
            "not_actionable" => Ok(ErrorKind::NotActionable),
            "validation_error" => Ok(ErrorKind::ValidationError),
            "resource_exhausted" => Ok(ErrorKind::ResourceExhausted),
            "not_found" => Ok(ErrorKind::NotFound),
            "conflict" => Ok(ErrorKind::Conflict),
            "default" => Ok(ErrorKind::Default),
            other => Err(format!("unknown error kind: '{other}'")),
        }
    }
}

/// A classified task failure, recorded on the `TaskResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors from repository operations (used by trait definitions in taskloom-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
