//! Workflow definition types.
//!
//! A `WorkflowDefinition` is an immutable template: an ordered list of
//! `TaskSpec`s whose `depends_on` edges form a DAG. Definitions are shared
//! read-only across any number of concurrent executions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Task parameters: a JSON object whose string values may carry
/// `${task.path}` placeholders.
pub type Parameters = Map<String, Value>;

/// Parameter key holding a task's own timeout in milliseconds.
pub const TIMEOUT_PARAM: &str = "timeout_ms";

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Opaque identifier, unique per registry.
    pub id: String,
    /// Human-readable name. Defaults to the id when omitted.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tasks in declaration order. The order is the dispatch tie-breaker.
    pub tasks: Vec<TaskSpec>,
    /// Extensible metadata (for future use / custom integrations).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowDefinition {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// Look up a task by id.
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

// ---------------------------------------------------------------------------
// Task Spec
// ---------------------------------------------------------------------------

/// A single task in the workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Unique within the workflow.
    pub id: String,
    /// Executor family handling this task (e.g. "navigator", "extractor").
    pub agent_type: String,
    /// Operation name (e.g. "navigate", "click", "screenshot").
    pub action: String,
    #[serde(default)]
    pub parameters: Parameters,
    /// Task ids this task depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Parameter overrides tried on successive retries after an
    /// element-not-found failure (e.g. alternative selectors).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_parameters: Vec<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_overrides: Option<RetryOverrides>,
    /// Task-level timeout in seconds (engine default 300).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Per-task override of the engine's retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOverrides {
    /// Maximum total attempts for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Backoff base delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
}
