//! Task dependency graph: validation, cycle detection, and traversal.
//!
//! Uses `petgraph` to model `depends_on` edges as a directed graph. The graph
//! is validated once (duplicates, dangling references, cycles) and then
//! queried by the scheduler for readiness and fail-fast skip propagation.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use taskloom_types::workflow::TaskSpec;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// TaskGraph
// ---------------------------------------------------------------------------

/// A validated dependency graph over a workflow's tasks.
///
/// Node indices coincide with positions in the task slice the graph was built
/// from, so callers can keep per-task state in a parallel `Vec`.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<usize, ()>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    /// Build the graph, rejecting duplicate ids, unknown dependencies, and cycles.
    ///
    /// Edges run from dependency to dependent.
    pub fn build(tasks: &[TaskSpec]) -> Result<Self, WorkflowError> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(WorkflowError::DuplicateTask(task.id.clone()));
            }
        }

        let mut graph = DiGraph::<usize, ()>::with_capacity(tasks.len(), tasks.len());
        for i in 0..tasks.len() {
            graph.add_node(i);
        }

        for (to, task) in tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let from = index.get(dep.as_str()).ok_or_else(|| {
                    WorkflowError::UnknownDependency(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, dep
                    ))
                })?;
                graph.update_edge(NodeIndex::new(*from), NodeIndex::new(to), ());
            }
        }

        // Topological sort -- detects cycles, including self-loops
        toposort(&graph, None).map_err(|cycle| {
            let task = &tasks[graph[cycle.node_id()]];
            WorkflowError::CycleDetected(format!("cycle detected involving task '{}'", task.id))
        })?;

        Ok(Self { graph, index })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn index_of(&self, task_id: &str) -> Option<usize> {
        self.index.get(task_id).copied()
    }

    /// Direct dependencies of a task, ascending by declaration order.
    pub fn dependencies(&self, idx: usize) -> Vec<usize> {
        self.sorted(
            self.graph
                .neighbors_directed(NodeIndex::new(idx), petgraph::Direction::Incoming)
                .map(|n| n.index()),
        )
    }

    /// Every task that depends on `idx` directly or transitively.
    pub fn transitive_dependents(&self, idx: usize) -> Vec<usize> {
        let mut bfs = Bfs::new(&self.graph, NodeIndex::new(idx));
        let mut found = Vec::new();
        while let Some(node) = bfs.next(&self.graph) {
            if node.index() != idx {
                found.push(node.index());
            }
        }
        self.sorted(found)
    }

    /// Every task `idx` depends on directly or transitively.
    pub fn transitive_dependencies(&self, idx: usize) -> Vec<usize> {
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, NodeIndex::new(idx));
        let mut found = Vec::new();
        while let Some(node) = bfs.next(reversed) {
            if node.index() != idx {
                found.push(node.index());
            }
        }
        self.sorted(found)
    }

    /// Group tasks into waves: every task in wave `n` has all of its
    /// dependencies in waves `< n`. Used for plan display; the scheduler
    /// itself is event-driven.
    pub fn waves(&self) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; self.len()];
        // Build succeeded, so the sort cannot fail
        let order = toposort(&self.graph, None).unwrap_or_default();
        for node in order {
            let d = self
                .graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .map(|dep| depth[dep.index()] + 1)
                .max()
                .unwrap_or(0);
            depth[node.index()] = d;
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut waves = vec![Vec::new(); if self.is_empty() { 0 } else { max_depth + 1 }];
        for (idx, d) in depth.into_iter().enumerate() {
            waves[d].push(idx);
        }
        waves
    }

    fn sorted(&self, nodes: impl IntoIterator<Item = usize>) -> Vec<usize> {
        let mut set: Vec<usize> = nodes.into_iter().collect::<HashSet<_>>().into_iter().collect();
        set.sort_unstable();
        set
    }
}

/// Validate that tasks form a DAG (unique ids, known dependencies, no cycles).
pub fn validate_dag(tasks: &[TaskSpec]) -> Result<(), WorkflowError> {
    TaskGraph::build(tasks).map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
