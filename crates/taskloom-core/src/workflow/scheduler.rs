//! Execution scheduler: event-driven DAG execution with classified retries.
//!
//! The scheduler owns one execution while it runs. It repeatedly computes the
//! ready set (pending tasks whose dependencies all completed), dispatches
//! ready tasks in declaration order up to the concurrency bound, and reacts
//! to each settled attempt:
//!
//! 1. Success: record the output under `variables[task_id]`, re-evaluate.
//! 2. Failure: classify, ask the retry classifier for a decision, and either
//!    wait out the backoff (other tasks keep running) or fail the task and
//!    skip its transitive dependents.
//! 3. No pending or in-flight work left: settle the execution status.
//!
//! Every attempt and backoff is a tracked `JoinSet` member; nothing is
//! detached from the execution that owns it. Only executing attempts hold a
//! concurrency slot: a task waiting out its backoff does not, and a retry
//! whose backoff elapsed while the bound is reached queues for the next free
//! slot ahead of newly ready tasks. Cancellation stops new dispatches, lets
//! in-flight attempts settle, and abandons pending retries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use taskloom_types::config::EngineConfig;
use taskloom_types::error::{ErrorKind, RepositoryError, TaskError};
use taskloom_types::event::ExecutionEvent;
use taskloom_types::execution::{Execution, ExecutionStatus, TaskResult, TaskStatus};
use taskloom_types::workflow::{Parameters, WorkflowDefinition};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::executor::{BoxTaskExecutor, TaskRequest};
use crate::metrics::EngineMetrics;
use crate::repository::ExecutionRepository;

use super::checkpoint::CheckpointManager;
use super::dag::TaskGraph;
use super::definition::WorkflowError;
use super::resolver;
use super::retry::{RetryClassifier, RetryPolicy};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failures that abort a run. Task failures are recorded as data instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("persistence failed: {0}")]
    Repository(#[from] RepositoryError),

    #[error("invalid workflow: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("task join failed: {0}")]
    Join(String),
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// What a spawned unit of work reports back to the loop.
enum Outcome {
    Attempted {
        index: usize,
        elapsed: Duration,
        result: Result<Value, TaskError>,
    },
    BackoffElapsed {
        index: usize,
    },
    BackoffCancelled {
        index: usize,
    },
}

/// Working state of one execution. `execution.tasks`, `params`, and
/// `policies` are index-aligned with `definition.tasks`.
struct Run<'a> {
    definition: &'a WorkflowDefinition,
    graph: TaskGraph,
    execution: Execution,
    /// Unresolved parameters for each task's next attempt.
    params: Vec<Parameters>,
    policies: Vec<RetryPolicy>,
    /// Executor attempts in flight. Backoffs are not counted.
    executing: usize,
    /// Retries whose backoff elapsed while every slot was taken.
    awaiting_slot: VecDeque<usize>,
}

impl<'a> Run<'a> {
    fn new(
        definition: &'a WorkflowDefinition,
        graph: TaskGraph,
        mut execution: Execution,
        config: &EngineConfig,
    ) -> Self {
        let mut existing: HashMap<String, TaskResult> = execution
            .tasks
            .drain(..)
            .map(|t| (t.task_id.clone(), t))
            .collect();
        execution.tasks = definition
            .tasks
            .iter()
            .map(|t| existing.remove(&t.id).unwrap_or_else(|| TaskResult::pending(&t.id)))
            .collect();

        Self {
            definition,
            graph,
            execution,
            params: definition.tasks.iter().map(|t| t.parameters.clone()).collect(),
            policies: definition
                .tasks
                .iter()
                .map(|t| RetryPolicy::for_task(config, t))
                .collect(),
            executing: 0,
            awaiting_slot: VecDeque::new(),
        }
    }

    fn id(&self) -> Uuid {
        self.execution.id
    }

    fn is_ready(&self, idx: usize) -> bool {
        self.execution.tasks[idx].status == TaskStatus::Pending
            && self
                .graph
                .dependencies(idx)
                .into_iter()
                .all(|dep| self.execution.tasks[dep].status == TaskStatus::Completed)
    }

    fn at_capacity(&self, limit: Option<usize>) -> bool {
        limit.is_some_and(|max| self.executing >= max)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives executions to a terminal state. Shared by all runs of an engine;
/// per-run state lives on the stack of `run`.
pub struct Scheduler<R: ExecutionRepository> {
    checkpoints: CheckpointManager<R>,
    executor: Arc<BoxTaskExecutor>,
    events: EventBus,
    metrics: EngineMetrics,
    config: EngineConfig,
}

impl<R: ExecutionRepository> Scheduler<R> {
    pub fn new(
        repo: Arc<R>,
        executor: Arc<BoxTaskExecutor>,
        events: EventBus,
        metrics: EngineMetrics,
        config: EngineConfig,
    ) -> Self {
        Self {
            checkpoints: CheckpointManager::new(repo),
            executor,
            events,
            metrics,
            config,
        }
    }

    /// Run `execution` (already marked running) to a terminal state and
    /// return the final snapshot.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        execution: Execution,
        cancel: &CancellationToken,
    ) -> Result<Execution, SchedulerError> {
        let graph = TaskGraph::build(&definition.tasks)?;
        let mut run = Run::new(definition, graph, execution, &self.config);
        let mut join_set: JoinSet<Outcome> = JoinSet::new();
        let started = Instant::now();

        tracing::info!(
            execution_id = %run.id(),
            workflow_id = %definition.id,
            tasks = definition.tasks.len(),
            "execution started"
        );
        self.events.publish(ExecutionEvent::ExecutionStarted {
            execution_id: run.id(),
            workflow_id: definition.id.clone(),
        });

        loop {
            if cancel.is_cancelled() {
                while let Some(idx) = run.awaiting_slot.pop_front() {
                    self.withdraw(&mut run, idx).await?;
                }
            } else {
                self.dispatch_ready(&mut run, &mut join_set, cancel).await?;
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let outcome = joined.map_err(|e| SchedulerError::Join(e.to_string()))?;
            self.settle(&mut run, outcome, cancel, &mut join_set).await?;
        }

        self.finish(run, cancel.is_cancelled(), started.elapsed()).await
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Fill free slots: queued retries first, then ready tasks in declaration
    /// order. Checkpoint writes yield, so cancellation is rechecked before
    /// every dispatch.
    async fn dispatch_ready(
        &self,
        run: &mut Run<'_>,
        join_set: &mut JoinSet<Outcome>,
        cancel: &CancellationToken,
    ) -> Result<(), SchedulerError> {
        let limit = self.config.max_task_concurrency;
        while !cancel.is_cancelled() && !run.at_capacity(limit) {
            let Some(idx) = run.awaiting_slot.pop_front() else {
                break;
            };
            self.dispatch(run, idx, join_set, cancel).await?;
        }

        for idx in 0..run.execution.tasks.len() {
            if cancel.is_cancelled() || run.at_capacity(limit) {
                break;
            }
            if run.is_ready(idx) {
                self.dispatch(run, idx, join_set, cancel).await?;
            }
        }
        Ok(())
    }

    /// Resolve parameters and spawn one attempt. A resolution failure counts
    /// as an attempt and fails the task without retry.
    async fn dispatch(
        &self,
        run: &mut Run<'_>,
        idx: usize,
        join_set: &mut JoinSet<Outcome>,
        cancel: &CancellationToken,
    ) -> Result<(), SchedulerError> {
        if cancel.is_cancelled() {
            return self.withdraw(run, idx).await;
        }

        let execution_id = run.id();
        let resolved = resolver::resolve(&run.params[idx], &run.execution.variables);

        let result = &mut run.execution.tasks[idx];
        result.attempts += 1;
        result.started_at.get_or_insert_with(Utc::now);

        let parameters = match resolved {
            Ok(parameters) => parameters,
            Err(e) => {
                let error = TaskError::new(ErrorKind::ValidationError, e.to_string());
                self.events.publish(ExecutionEvent::TaskFailed {
                    execution_id,
                    task_id: result.task_id.clone(),
                    kind: error.kind,
                    error: error.message.clone(),
                    will_retry: false,
                });
                return self.fail_task(run, idx, error).await;
            }
        };

        result.status = TaskStatus::Running;
        let attempt = result.attempts;
        self.checkpoints.task(execution_id, result).await?;

        let definition = run.definition;
        let task = &definition.tasks[idx];
        let request = TaskRequest {
            execution_id,
            task_id: task.id.clone(),
            agent_type: task.agent_type.clone(),
            action: task.action.clone(),
            timeout: run.policies[idx].timeout_for(&parameters),
            parameters,
            attempt,
        };

        tracing::debug!(
            execution_id = %request.execution_id,
            task_id = %request.task_id,
            attempt,
            timeout_ms = request.timeout.as_millis() as u64,
            "dispatching task"
        );
        self.events.publish(ExecutionEvent::TaskStarted {
            execution_id: request.execution_id,
            task_id: request.task_id.clone(),
            attempt,
        });

        let executor = Arc::clone(&self.executor);
        run.executing += 1;
        self.metrics.task_started(&definition.id);
        join_set.spawn(async move {
            let started = Instant::now();
            let result =
                match tokio::time::timeout(request.timeout, executor.execute(&request)).await {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(failure)) => Err(TaskError::new(
                        RetryClassifier::classify(&failure),
                        failure.message,
                    )),
                    Err(_) => Err(TaskError::new(
                        ErrorKind::Timeout,
                        format!("task exceeded its {} ms timeout", request.timeout.as_millis()),
                    )),
                };
            Outcome::Attempted {
                index: idx,
                elapsed: started.elapsed(),
                result,
            }
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    async fn settle(
        &self,
        run: &mut Run<'_>,
        outcome: Outcome,
        cancel: &CancellationToken,
        join_set: &mut JoinSet<Outcome>,
    ) -> Result<(), SchedulerError> {
        if matches!(outcome, Outcome::Attempted { .. }) {
            run.executing = run.executing.saturating_sub(1);
            self.metrics.task_settled(&run.definition.id);
        }
        match outcome {
            Outcome::Attempted {
                index,
                elapsed,
                result: Ok(output),
            } => self.complete_task(run, index, output, elapsed).await,
            Outcome::Attempted {
                index,
                result: Err(error),
                ..
            } => self.handle_failure(run, index, error, cancel, join_set).await,
            Outcome::BackoffElapsed { index } if !cancel.is_cancelled() => {
                // Dispatched by the next `dispatch_ready` once a slot is free
                run.awaiting_slot.push_back(index);
                Ok(())
            }
            Outcome::BackoffElapsed { index } | Outcome::BackoffCancelled { index } => {
                self.withdraw(run, index).await
            }
        }
    }

    /// Settle a task that cancellation caught before its next attempt. A
    /// pending task stays pending for `finish` to skip; a task between
    /// retries fails with its last error.
    async fn withdraw(&self, run: &mut Run<'_>, idx: usize) -> Result<(), SchedulerError> {
        if run.execution.tasks[idx].status == TaskStatus::Pending {
            return Ok(());
        }
        let error = run.execution.tasks[idx]
            .error
            .clone()
            .unwrap_or_else(|| TaskError::new(ErrorKind::Default, "cancelled before retry"));
        self.fail_task(run, idx, error).await
    }

    async fn complete_task(
        &self,
        run: &mut Run<'_>,
        idx: usize,
        output: Value,
        elapsed: Duration,
    ) -> Result<(), SchedulerError> {
        let execution_id = run.id();
        let result = &mut run.execution.tasks[idx];
        result.status = TaskStatus::Completed;
        result.output = Some(output.clone());
        result.error = None;
        result.completed_at = Some(Utc::now());
        let attempts = result.attempts;
        let task_id = result.task_id.clone();

        self.checkpoints.task(execution_id, result).await?;
        run.execution.variables.insert(task_id.clone(), output);
        self.checkpoints.execution(&run.execution).await?;
        self.metrics.task_completed(&run.definition.id);

        tracing::info!(
            execution_id = %execution_id,
            task_id = %task_id,
            attempts,
            duration_ms = millis(elapsed),
            "task completed"
        );
        self.events.publish(ExecutionEvent::TaskCompleted {
            execution_id,
            task_id,
            attempts,
            duration_ms: millis(elapsed),
        });
        Ok(())
    }

    async fn handle_failure(
        &self,
        run: &mut Run<'_>,
        idx: usize,
        error: TaskError,
        cancel: &CancellationToken,
        join_set: &mut JoinSet<Outcome>,
    ) -> Result<(), SchedulerError> {
        let definition = run.definition;
        let task = &definition.tasks[idx];
        let attempt = run.execution.tasks[idx].attempts;
        let decision = RetryClassifier::decide(
            error.kind,
            attempt,
            task,
            &run.params[idx],
            &run.policies[idx],
        );
        let will_retry = decision.should_retry && !cancel.is_cancelled();

        self.events.publish(ExecutionEvent::TaskFailed {
            execution_id: run.id(),
            task_id: task.id.clone(),
            kind: error.kind,
            error: error.message.clone(),
            will_retry,
        });

        if !will_retry {
            return self.fail_task(run, idx, error).await;
        }

        tracing::warn!(
            execution_id = %run.id(),
            task_id = %task.id,
            attempt,
            kind = %error.kind,
            delay_ms = millis(decision.delay),
            error = %error.message,
            "task failed, retrying"
        );
        self.events.publish(ExecutionEvent::TaskRetrying {
            execution_id: run.id(),
            task_id: task.id.clone(),
            next_attempt: attempt + 1,
            delay_ms: millis(decision.delay),
        });

        run.params[idx] = decision.mutated_parameters;
        run.execution.tasks[idx].error = Some(error);
        self.checkpoints.task(run.id(), &run.execution.tasks[idx]).await?;

        let delay = decision.delay;
        let token = cancel.clone();
        join_set.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => Outcome::BackoffElapsed { index: idx },
                _ = token.cancelled() => Outcome::BackoffCancelled { index: idx },
            }
        });
        Ok(())
    }

    /// Record a permanent failure and skip every transitive dependent.
    async fn fail_task(
        &self,
        run: &mut Run<'_>,
        idx: usize,
        error: TaskError,
    ) -> Result<(), SchedulerError> {
        let execution_id = run.id();
        let now = Utc::now();
        let result = &mut run.execution.tasks[idx];
        result.status = TaskStatus::Failed;
        result.started_at.get_or_insert(now);
        result.completed_at = Some(now);

        tracing::warn!(
            execution_id = %execution_id,
            task_id = %result.task_id,
            attempts = result.attempts,
            kind = %error.kind,
            error = %error.message,
            "task failed"
        );
        self.metrics.task_failed(&run.definition.id, error.kind);
        result.error = Some(error);
        self.checkpoints.task(execution_id, result).await?;

        for dependent in run.graph.transitive_dependents(idx) {
            if run.execution.tasks[dependent].status == TaskStatus::Pending {
                self.skip_task(run, dependent).await?;
            }
        }
        Ok(())
    }

    async fn skip_task(&self, run: &mut Run<'_>, idx: usize) -> Result<(), SchedulerError> {
        let execution_id = run.id();
        let result = &mut run.execution.tasks[idx];
        result.status = TaskStatus::Skipped;
        result.completed_at = Some(Utc::now());
        self.checkpoints.task(execution_id, result).await?;

        tracing::debug!(execution_id = %execution_id, task_id = %result.task_id, "task skipped");
        self.events.publish(ExecutionEvent::TaskSkipped {
            execution_id,
            task_id: result.task_id.clone(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    async fn finish(
        &self,
        mut run: Run<'_>,
        cancelled: bool,
        elapsed: Duration,
    ) -> Result<Execution, SchedulerError> {
        let leftover: Vec<usize> = (0..run.execution.tasks.len())
            .filter(|&i| run.execution.tasks[i].status == TaskStatus::Pending)
            .collect();
        for idx in &leftover {
            self.skip_task(&mut run, *idx).await?;
        }

        let tasks = &run.execution.tasks;
        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        if !cancelled && !leftover.is_empty() && status == ExecutionStatus::Failed {
            run.execution.error.get_or_insert_with(|| {
                format!("{} task(s) could never become ready", leftover.len())
            });
        }

        run.execution.status = status;
        run.execution.completed_at = Some(Utc::now());
        self.checkpoints.execution(&run.execution).await?;
        self.metrics
            .execution_finished(&run.definition.id, status, elapsed);

        let progress = run.execution.progress();
        tracing::info!(
            execution_id = %run.id(),
            status = %status,
            completed = progress.completed,
            failed = progress.failed,
            skipped = progress.skipped,
            duration_ms = millis(elapsed),
            "execution finished"
        );
        self.events.publish(ExecutionEvent::ExecutionFinished {
            execution_id: run.id(),
            status,
            duration_ms: millis(elapsed),
        });
        Ok(run.execution)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
