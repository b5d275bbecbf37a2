//! Workflow definition parsing and validation.
//!
//! Converts between YAML files and the canonical `WorkflowDefinition`, and
//! validates structural constraints (unique ids, valid dependencies, no
//! cycles, placeholders that can actually be satisfied) before any execution
//! state is created.

use std::path::Path;

use serde_json::{Map, Value};
use taskloom_types::workflow::{TaskSpec, WorkflowDefinition};
use thiserror::Error;

use super::dag::TaskGraph;
use super::resolver::{self, Reference};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors describing an unusable workflow definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Structural validation failure.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("duplicate task id: '{0}'")]
    DuplicateTask(String),

    /// A task depends on a task id that is not in the workflow.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// Dependency graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A placeholder names something the task can never see.
    #[error("unknown reference: {0}")]
    UnknownReference(String),

    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML (or JSON) string into a validated `WorkflowDefinition`.
///
/// Seed variables are unknown at this point, so placeholders whose head is
/// not a task id are accepted here and checked again at execution creation.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_definition(&def, None)?;
    Ok(def)
}

pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::Parse(e.to_string()))
}

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a definition and return its dependency graph.
///
/// Checks:
/// - Workflow id is non-empty and at least one task exists
/// - Every task has an id, agent type, and action; timeouts and retry
///   overrides are positive
/// - Task ids are unique, dependencies exist, and the graph is acyclic
/// - Every `${task...}` placeholder (in parameters and alternatives) names a
///   transitive dependency of the referencing task
/// - With `seeds` given, every other placeholder head is a seed variable
pub fn validate_definition(
    def: &WorkflowDefinition,
    seeds: Option<&Map<String, Value>>,
) -> Result<TaskGraph, WorkflowError> {
    if def.id.trim().is_empty() {
        return Err(WorkflowError::InvalidDefinition(
            "workflow id must not be empty".to_string(),
        ));
    }
    if def.tasks.is_empty() {
        return Err(WorkflowError::InvalidDefinition(format!(
            "workflow '{}' must have at least one task",
            def.id
        )));
    }
    for task in &def.tasks {
        validate_task_fields(task)?;
    }

    let graph = TaskGraph::build(&def.tasks)?;

    for (idx, task) in def.tasks.iter().enumerate() {
        let upstream = graph.transitive_dependencies(idx);
        for reference in task_references(task)? {
            match graph.index_of(&reference.head) {
                Some(target) if upstream.contains(&target) => {}
                Some(_) => {
                    return Err(WorkflowError::UnknownReference(format!(
                        "task '{}' references '${{{}}}' but does not depend on '{}'",
                        task.id, reference, reference.head
                    )));
                }
                None => {
                    if let Some(seeds) = seeds {
                        if !seeds.contains_key(&reference.head) {
                            return Err(WorkflowError::UnknownReference(format!(
                                "task '{}' references '${{{}}}': '{}' is neither a task nor a variable",
                                task.id, reference, reference.head
                            )));
                        }
                    }
                }
            }
        }
    }

    Ok(graph)
}

/// Names every execution of `def` must seed: placeholder heads that are not
/// task ids. Sorted and deduplicated.
pub fn seed_variables(def: &WorkflowDefinition) -> Result<Vec<String>, WorkflowError> {
    let mut names = Vec::new();
    for task in &def.tasks {
        for reference in task_references(task)? {
            if !def.tasks.iter().any(|t| t.id == reference.head) {
                names.push(reference.head);
            }
        }
    }
    names.sort();
    names.dedup();
    Ok(names)
}

fn validate_task_fields(task: &TaskSpec) -> Result<(), WorkflowError> {
    if task.id.trim().is_empty() {
        return Err(WorkflowError::InvalidDefinition(
            "task id must not be empty".to_string(),
        ));
    }
    if task.agent_type.trim().is_empty() || task.action.trim().is_empty() {
        return Err(WorkflowError::InvalidDefinition(format!(
            "task '{}' must name an agent type and an action",
            task.id
        )));
    }
    if task.timeout_secs == Some(0) {
        return Err(WorkflowError::InvalidDefinition(format!(
            "task '{}': timeout must be > 0",
            task.id
        )));
    }
    if let Some(overrides) = task.retry_overrides {
        if overrides.max_retries == Some(0) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "task '{}': maxRetries must be >= 1",
                task.id
            )));
        }
    }
    Ok(())
}

fn task_references(task: &TaskSpec) -> Result<Vec<Reference>, WorkflowError> {
    let mut refs = resolver::references(&task.parameters)
        .map_err(|e| WorkflowError::InvalidDefinition(format!("task '{}': {e}", task.id)))?;
    for alternative in &task.alternative_parameters {
        refs.extend(
            resolver::references(alternative).map_err(|e| {
                WorkflowError::InvalidDefinition(format!("task '{}': {e}", task.id))
            })?,
        );
    }
    Ok(refs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
