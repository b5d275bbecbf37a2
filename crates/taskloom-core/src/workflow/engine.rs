//! Orchestration engine: execution lifecycle, registry, and concurrency limits.
//!
//! The `Engine` owns a registry of workflow definitions, an explicit map of
//! running executions (`execution_id -> RunHandle`), and a semaphore bounding
//! how many executions run at once. Each started execution is driven by the
//! shared `Scheduler` on a task tracked by a `TaskTracker`, so `shutdown` can
//! drain them.
//!
//! Every transition is persisted through the `ExecutionRepository` before a
//! caller can observe it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use taskloom_types::config::EngineConfig;
use taskloom_types::error::{ErrorKind, RepositoryError, TaskError};
use taskloom_types::event::ExecutionEvent;
use taskloom_types::execution::{Execution, ExecutionStatus, TaskResult, TaskStatus};
use taskloom_types::workflow::WorkflowDefinition;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::event::EventBus;
use crate::executor::BoxTaskExecutor;
use crate::metrics::EngineMetrics;
use crate::repository::ExecutionRepository;

use super::definition::{WorkflowError, validate_definition};
use super::scheduler::Scheduler;

/// Run-level error recorded for executions orphaned by a previous process.
pub const INTERRUPTED: &str = "interrupted";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned to engine callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// The error taxonomy kind this error surfaces as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::ValidationError,
            EngineError::NotFound(_) | EngineError::Repository(RepositoryError::NotFound) => {
                ErrorKind::NotFound
            }
            EngineError::Conflict(_)
            | EngineError::ShuttingDown
            | EngineError::Repository(RepositoryError::Conflict(_)) => ErrorKind::Conflict,
            EngineError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            EngineError::Repository(_) => ErrorKind::Default,
        }
    }
}

impl From<WorkflowError> for EngineError {
    fn from(err: WorkflowError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Handle to an execution driven by this engine.
struct RunHandle {
    cancel: CancellationToken,
    /// Set to the terminal status once the run has settled.
    done: watch::Receiver<Option<ExecutionStatus>>,
}

pub struct Engine<R: ExecutionRepository + 'static> {
    repo: Arc<R>,
    scheduler: Arc<Scheduler<R>>,
    events: EventBus,
    metrics: EngineMetrics,
    config: EngineConfig,
    workflows: DashMap<String, Arc<WorkflowDefinition>>,
    runs: Arc<DashMap<Uuid, RunHandle>>,
    run_slots: Arc<Semaphore>,
    /// Serializes start/cancel transitions of not-yet-running executions.
    lifecycle: Mutex<()>,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
}

impl<R: ExecutionRepository + 'static> Engine<R> {
    pub fn new(repo: R, executor: BoxTaskExecutor, config: EngineConfig) -> Self {
        let repo = Arc::new(repo);
        let events = EventBus::new(config.event_capacity);
        let metrics = EngineMetrics::global();
        let scheduler = Scheduler::new(
            Arc::clone(&repo),
            Arc::new(executor),
            events.clone(),
            metrics.clone(),
            config.clone(),
        );
        Self {
            repo,
            scheduler: Arc::new(scheduler),
            events,
            metrics,
            run_slots: Arc::new(Semaphore::new(config.max_running_executions)),
            config,
            workflows: DashMap::new(),
            runs: Arc::new(DashMap::new()),
            lifecycle: Mutex::new(()),
            tracker: TaskTracker::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to lifecycle events of every execution.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Number of executions currently driven by this engine.
    pub fn running_count(&self) -> usize {
        self.runs.len()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Workflow registry
    // -----------------------------------------------------------------------

    /// Validate, persist, and cache a definition. Replaces any definition
    /// with the same id; executions already running keep the old one.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> Result<(), EngineError> {
        validate_definition(&definition, None)?;
        self.repo.save_workflow(&definition).await?;
        tracing::info!(
            workflow_id = %definition.id,
            tasks = definition.tasks.len(),
            "workflow registered"
        );
        self.workflows
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        Ok(self.repo.list_workflows().await?)
    }

    /// Look a definition up in the cache, then in storage.
    pub async fn workflow(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>, EngineError> {
        if let Some(def) = self.workflows.get(workflow_id) {
            return Ok(Arc::clone(&def));
        }
        let def = self
            .repo
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow '{workflow_id}'")))?;
        let def = Arc::new(def);
        self.workflows
            .insert(workflow_id.to_string(), Arc::clone(&def));
        Ok(def)
    }

    // -----------------------------------------------------------------------
    // Execution lifecycle
    // -----------------------------------------------------------------------

    /// Validate the workflow against `seeds` and persist a pending execution.
    pub async fn create_execution(
        &self,
        workflow_id: &str,
        seeds: Map<String, Value>,
    ) -> Result<Execution, EngineError> {
        self.ensure_open()?;
        let definition = self.workflow(workflow_id).await?;
        validate_definition(&definition, Some(&seeds))?;
        if let Some(task) = definition.tasks.iter().find(|t| seeds.contains_key(&t.id)) {
            return Err(EngineError::Validation(format!(
                "seed variable '{}' shadows a task id",
                task.id
            )));
        }

        let execution = Execution {
            id: Uuid::now_v7(),
            workflow_id: definition.id.clone(),
            status: ExecutionStatus::Pending,
            variables: seeds,
            started_at: None,
            completed_at: None,
            error: None,
            tasks: definition
                .tasks
                .iter()
                .map(|t| TaskResult::pending(&t.id))
                .collect(),
        };

        self.repo.save_execution(&execution).await?;
        for task in &execution.tasks {
            self.repo.save_task_result(&execution.id, task).await?;
        }
        self.metrics
            .tasks_created(&execution.workflow_id, execution.tasks.len());

        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            "execution created"
        );
        Ok(execution)
    }

    /// Move a pending execution to running and hand it to the scheduler.
    pub async fn start(&self, execution_id: Uuid) -> Result<(), EngineError> {
        self.ensure_open()?;
        let _guard = self.lifecycle.lock().await;

        if self.runs.contains_key(&execution_id) {
            return Err(EngineError::Conflict(format!(
                "execution {execution_id} is already running"
            )));
        }
        let mut execution = self.load(execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            return Err(EngineError::Conflict(format!(
                "execution {execution_id} is already {}",
                execution.status
            )));
        }
        let definition = self.workflow(&execution.workflow_id).await?;

        let permit = Arc::clone(&self.run_slots)
            .try_acquire_owned()
            .map_err(|_| {
                tracing::warn!(
                    execution_id = %execution_id,
                    limit = self.config.max_running_executions,
                    "running execution limit reached"
                );
                EngineError::ResourceExhausted(format!(
                    "{} executions already running",
                    self.config.max_running_executions
                ))
            })?;

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.repo.save_execution(&execution).await?;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        self.runs.insert(
            execution_id,
            RunHandle {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let scheduler = Arc::clone(&self.scheduler);
        let runs = Arc::clone(&self.runs);
        let repo = Arc::clone(&self.repo);
        self.tracker.spawn(async move {
            let status = match scheduler.run(&definition, execution, &cancel).await {
                Ok(finished) => finished.status,
                Err(e) => {
                    tracing::error!(execution_id = %execution_id, error = %e, "execution aborted");
                    abandon(repo.as_ref(), execution_id, &e.to_string()).await
                }
            };
            drop(permit);
            runs.remove(&execution_id);
            let _ = done_tx.send(Some(status));
        });
        Ok(())
    }

    /// Request cancellation. Idempotent on terminal executions; a pending
    /// execution is cancelled immediately.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let _guard = self.lifecycle.lock().await;

        if let Some(handle) = self.runs.get(&execution_id) {
            if !handle.cancel.is_cancelled() {
                handle.cancel.cancel();
                tracing::info!(execution_id = %execution_id, "cancellation requested");
                self.events
                    .publish(ExecutionEvent::CancellationRequested { execution_id });
            }
            return Ok(());
        }

        let mut execution = self.load(execution_id).await?;
        match execution.status {
            status if status.is_terminal() => Ok(()),
            ExecutionStatus::Pending => {
                let now = Utc::now();
                for task in &mut execution.tasks {
                    if task.status == TaskStatus::Pending {
                        task.status = TaskStatus::Skipped;
                        task.completed_at = Some(now);
                        self.repo.save_task_result(&execution_id, task).await?;
                    }
                }
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = Some(now);
                self.repo.save_execution(&execution).await?;

                tracing::info!(execution_id = %execution_id, "pending execution cancelled");
                self.events
                    .publish(ExecutionEvent::CancellationRequested { execution_id });
                self.events.publish(ExecutionEvent::ExecutionFinished {
                    execution_id,
                    status: ExecutionStatus::Cancelled,
                    duration_ms: 0,
                });
                Ok(())
            }
            _ => Err(EngineError::Conflict(format!(
                "execution {execution_id} is running but not owned by this engine"
            ))),
        }
    }

    /// Cancel every execution this engine is driving.
    pub fn cancel_all(&self) {
        for entry in self.runs.iter() {
            if !entry.cancel.is_cancelled() {
                entry.cancel.cancel();
                self.events.publish(ExecutionEvent::CancellationRequested {
                    execution_id: *entry.key(),
                });
            }
        }
    }

    /// Current snapshot including all task results.
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        self.load(execution_id).await
    }

    /// Wait until a running execution settles, then return its snapshot.
    /// Returns immediately for executions this engine is not driving.
    pub async fn wait(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let done = self.runs.get(&execution_id).map(|h| h.done.clone());
        if let Some(mut done) = done {
            // A dropped sender means the run task is gone; storage has the rest
            let _ = done.wait_for(Option::is_some).await;
        }
        self.load(execution_id).await
    }

    /// Create, start, and wait for an execution.
    pub async fn run(
        &self,
        workflow_id: &str,
        seeds: Map<String, Value>,
    ) -> Result<Execution, EngineError> {
        let execution = self.create_execution(workflow_id, seeds).await?;
        self.start(execution.id).await?;
        self.wait(execution.id).await
    }

    pub async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<Execution>, EngineError> {
        Ok(self.repo.list_executions(status).await?)
    }

    /// Delete a terminal execution and its task results.
    pub async fn purge_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let execution = self.load(execution_id).await?;
        if !execution.status.is_terminal() || self.runs.contains_key(&execution_id) {
            return Err(EngineError::Conflict(format!(
                "execution {execution_id} is {} and cannot be purged",
                execution.status
            )));
        }
        self.repo.delete_execution(&execution_id).await?;
        tracing::info!(execution_id = %execution_id, "execution purged");
        Ok(())
    }

    /// Mark executions left `running` by a previous process as failed.
    /// Returns how many were recovered.
    pub async fn recover_interrupted(&self) -> Result<usize, EngineError> {
        let orphans = self
            .repo
            .list_executions(Some(ExecutionStatus::Running))
            .await?;
        let mut recovered = 0;
        for orphan in orphans {
            if self.runs.contains_key(&orphan.id) {
                continue;
            }
            abandon(self.repo.as_ref(), orphan.id, INTERRUPTED).await;
            recovered += 1;
        }
        if recovered > 0 {
            tracing::warn!(count = recovered, "recovered interrupted executions");
        }
        Ok(recovered)
    }

    /// Stop accepting work and wait for every tracked execution to settle.
    /// Call `cancel_all` first to stop them early.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.tracker.close();
        tracing::info!(running = self.runs.len(), "engine shutting down");
        self.tracker.wait().await;
        tracing::info!("engine shut down");
    }

    async fn load(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        self.repo
            .load_execution(&execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))
    }
}

/// Best-effort: mark an execution failed with `reason`, failing running
/// tasks and skipping pending ones. Returns the status it ends in.
async fn abandon<R: ExecutionRepository>(
    repo: &R,
    execution_id: Uuid,
    reason: &str,
) -> ExecutionStatus {
    let mut execution = match repo.load_execution(&execution_id).await {
        Ok(Some(execution)) => execution,
        Ok(None) => return ExecutionStatus::Failed,
        Err(e) => {
            tracing::error!(execution_id = %execution_id, error = %e, "failed to load execution");
            return ExecutionStatus::Failed;
        }
    };

    let now = Utc::now();
    for task in &mut execution.tasks {
        let changed = match task.status {
            TaskStatus::Running => {
                task.status = TaskStatus::Failed;
                task.error = Some(TaskError::new(ErrorKind::Default, reason));
                true
            }
            TaskStatus::Pending => {
                task.status = TaskStatus::Skipped;
                true
            }
            _ => false,
        };
        if changed {
            task.completed_at = Some(now);
            if let Err(e) = repo.save_task_result(&execution_id, task).await {
                tracing::error!(execution_id = %execution_id, error = %e, "failed to persist task");
            }
        }
    }

    execution.status = ExecutionStatus::Failed;
    execution.error = Some(reason.to_string());
    execution.completed_at = Some(now);
    if let Err(e) = repo.save_execution(&execution).await {
        tracing::error!(execution_id = %execution_id, error = %e, "failed to persist execution");
    }
    ExecutionStatus::Failed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// End-to-end scenarios with scripted executors and the in-memory repository.
#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::{Map, Value, json};
    use taskloom_types::workflow::{Parameters, RetryOverrides, TaskSpec};

    use crate::executor::{ExecutorFailure, TaskExecutor, TaskRequest};
    use crate::repository::InMemoryExecutionRepository;

    use super::*;

    // ---------------------------------------------------------------------------
    // Fixtures
    // ---------------------------------------------------------------------------

    type Script = dyn Fn(&TaskRequest) -> Result<Value, ExecutorFailure> + Send + Sync;
    type DelayFn = dyn Fn(&TaskRequest) -> Duration + Send + Sync;

    fn no_delay(_: &TaskRequest) -> Duration {
        Duration::ZERO
    }

    /// Executor whose behaviour is a pure function of the request.
    #[derive(Clone)]
    struct ScriptedExecutor {
        script: Arc<Script>,
        delay: Arc<DelayFn>,
        calls: Arc<Mutex<Vec<TaskRequest>>>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ScriptedExecutor {
        fn new(
            script: impl Fn(&TaskRequest) -> Result<Value, ExecutorFailure> + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Arc::new(script),
                delay: Arc::new(no_delay),
                calls: Arc::new(Mutex::new(Vec::new())),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn succeeding() -> Self {
            Self::new(|req| Ok(json!({"task": req.task_id, "url": format!("https://site/{}", req.task_id)})))
        }

        fn with_delay(mut self, delay: impl Fn(&TaskRequest) -> Duration + Send + Sync + 'static) -> Self {
            self.delay = Arc::new(delay);
            self
        }

        fn calls(&self) -> Vec<TaskRequest> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_for(&self, task_id: &str) -> Vec<TaskRequest> {
            self.calls()
                .into_iter()
                .filter(|c| c.task_id == task_id)
                .collect()
        }
    }

    impl TaskExecutor for ScriptedExecutor {
        async fn execute(&self, request: &TaskRequest) -> Result<Value, ExecutorFailure> {
            self.calls.lock().unwrap().push(request.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = (self.delay)(request);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            (self.script)(request)
        }
    }

    /// Executor that blocks every dispatch until `release` is cancelled.
    #[derive(Clone, Default)]
    struct GatedExecutor {
        release: CancellationToken,
        started: Arc<Mutex<Vec<String>>>,
    }

    impl TaskExecutor for GatedExecutor {
        async fn execute(&self, request: &TaskRequest) -> Result<Value, ExecutorFailure> {
            self.started.lock().unwrap().push(request.task_id.clone());
            self.release.cancelled().await;
            Ok(json!({"task": request.task_id}))
        }
    }

    /// In-memory storage that yields for `delay` on every write marking a task
    /// running, so the scheduler is suspended mid-dispatch.
    #[derive(Clone)]
    struct SlowCheckpointRepo {
        inner: InMemoryExecutionRepository,
        delay: Duration,
    }

    impl ExecutionRepository for SlowCheckpointRepo {
        async fn save_workflow(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
            self.inner.save_workflow(def).await
        }

        async fn load_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, RepositoryError> {
            self.inner.load_workflow(id).await
        }

        async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
            self.inner.list_workflows().await
        }

        async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
            self.inner.save_execution(execution).await
        }

        async fn load_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
            self.inner.load_execution(id).await
        }

        async fn list_executions(
            &self,
            status: Option<ExecutionStatus>,
        ) -> Result<Vec<Execution>, RepositoryError> {
            self.inner.list_executions(status).await
        }

        async fn delete_execution(&self, id: &Uuid) -> Result<bool, RepositoryError> {
            self.inner.delete_execution(id).await
        }

        async fn save_task_result(
            &self,
            execution_id: &Uuid,
            result: &TaskResult,
        ) -> Result<(), RepositoryError> {
            if result.status == TaskStatus::Running {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.save_task_result(execution_id, result).await
        }

        async fn list_tasks_for_execution(
            &self,
            execution_id: &Uuid,
        ) -> Result<Vec<TaskResult>, RepositoryError> {
            self.inner.list_tasks_for_execution(execution_id).await
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            base_delay_ms: 1,
            ..EngineConfig::default()
        }
    }

    fn engine_with(
        executor: impl TaskExecutor + 'static,
        config: EngineConfig,
    ) -> Engine<InMemoryExecutionRepository> {
        Engine::new(
            InMemoryExecutionRepository::new(),
            BoxTaskExecutor::new(executor),
            config,
        )
    }

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap_or_default()
    }

    fn task(id: &str, action: &str, depends_on: &[&str], parameters: Value) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            agent_type: "browser".to_string(),
            action: action.to_string(),
            parameters: params(parameters),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            alternative_parameters: Vec::new(),
            retry_overrides: None,
            timeout_secs: None,
        }
    }

    fn workflow(id: &str, tasks: Vec<TaskSpec>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_string(),
            name: String::new(),
            description: None,
            tasks,
            metadata: HashMap::new(),
        }
    }

    /// navigate -> click -> screenshot
    fn checkout_flow() -> WorkflowDefinition {
        workflow(
            "checkout",
            vec![
                task("navigate", "navigate", &[], json!({"url": "${start_url}"})),
                task(
                    "click",
                    "click",
                    &["navigate"],
                    json!({"selector": "#buy", "page": "${navigate.output.url}"}),
                ),
                task("screenshot", "screenshot", &["click"], json!({"name": "done"})),
            ],
        )
    }

    fn seeds() -> Map<String, Value> {
        params(json!({"start_url": "https://shop.example"}))
    }

    fn status_of(execution: &Execution, task_id: &str) -> TaskStatus {
        execution.task(task_id).unwrap().status
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<ExecutionEvent>,
        pred: impl Fn(&ExecutionEvent) -> bool,
    ) -> ExecutionEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not observed")
    }

    // ---------------------------------------------------------------------------
    // Scenarios
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn happy_path_completes_with_single_attempts() {
        let executor = ScriptedExecutor::succeeding();
        let engine = engine_with(executor.clone(), test_config());
        engine.register_workflow(checkout_flow()).await.unwrap();

        let execution = engine.run("checkout", seeds()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.started_at.is_some() && execution.completed_at.is_some());
        for result in &execution.tasks {
            assert_eq!(result.status, TaskStatus::Completed);
            assert_eq!(result.attempts, 1);
            assert!(result.error.is_none());
        }

        // Upstream output flowed into the click parameters
        let click = executor.calls_for("click");
        assert_eq!(click[0].parameters["page"], "https://site/navigate");
        assert_eq!(executor.calls_for("navigate")[0].parameters["url"], "https://shop.example");
        assert_eq!(execution.variables["screenshot"]["task"], "screenshot");
        assert_eq!(execution.progress().completed, 3);
    }

    #[tokio::test]
    async fn selector_fallback_uses_alternatives() {
        let executor = ScriptedExecutor::new(|req| match req.parameters.get("selector") {
            Some(Value::String(s)) if s == "#a" || s == "#b" => {
                Err(ExecutorFailure::new(format!("Element not found: {s}")))
            }
            _ => Ok(json!({"clicked": true})),
        });
        let engine = engine_with(executor.clone(), test_config());

        let mut click = task("click", "click", &[], json!({"selector": "#a"}));
        click.alternative_parameters = vec![params(json!({"selector": "#b"})), params(json!({"selector": "#c"}))];
        engine.register_workflow(workflow("fallback", vec![click])).await.unwrap();

        let execution = engine.run("fallback", Map::new()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let click = execution.task("click").unwrap();
        assert_eq!(click.attempts, 3);
        assert_eq!(click.status, TaskStatus::Completed);

        let selectors: Vec<_> = executor
            .calls_for("click")
            .iter()
            .map(|c| c.parameters["selector"].clone())
            .collect();
        assert_eq!(selectors, vec![json!("#a"), json!("#b"), json!("#c")]);
        let attempts: Vec<_> = executor.calls_for("click").iter().map(|c| c.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unknown_reference_rejected_at_create() {
        let engine = engine_with(ScriptedExecutor::succeeding(), test_config());
        engine
            .register_workflow(workflow(
                "broken",
                vec![task("x", "extract", &[], json!({"v": "${missingTask.output.x}"}))],
            ))
            .await
            .unwrap();

        let err = engine.create_execution("broken", Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(engine.list_executions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_definition_rejected_at_registration() {
        let engine = engine_with(ScriptedExecutor::succeeding(), test_config());
        let cyclic = workflow(
            "cyclic",
            vec![task("a", "x", &["b"], json!({})), task("b", "x", &["a"], json!({}))],
        );
        let err = engine.register_workflow(cyclic).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(matches!(
            engine.create_execution("cyclic", Map::new()).await.unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn runtime_resolution_failure_is_not_retried() {
        let executor = ScriptedExecutor::new(|_| Ok(json!({"present": 1})));
        let engine = engine_with(executor.clone(), test_config());
        engine
            .register_workflow(workflow(
                "missing-field",
                vec![
                    task("a", "extract", &[], json!({})),
                    task("b", "type", &["a"], json!({"value": "${a.output.absent}"})),
                    task("c", "click", &["b"], json!({})),
                ],
            ))
            .await
            .unwrap();

        let execution = engine.run("missing-field", Map::new()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        let b = execution.task("b").unwrap();
        assert_eq!(b.status, TaskStatus::Failed);
        assert_eq!(b.attempts, 1);
        assert_eq!(b.error.as_ref().unwrap().kind, ErrorKind::ValidationError);
        assert_eq!(status_of(&execution, "c"), TaskStatus::Skipped);
        assert!(executor.calls_for("b").is_empty());
    }

    #[tokio::test]
    async fn start_beyond_limit_is_resource_exhausted() {
        let executor = GatedExecutor::default();
        let engine = engine_with(executor.clone(), test_config());
        engine
            .register_workflow(workflow("one", vec![task("a", "navigate", &[], json!({}))]))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..51 {
            ids.push(engine.create_execution("one", Map::new()).await.unwrap().id);
        }
        for id in &ids[..50] {
            engine.start(*id).await.unwrap();
        }
        assert_eq!(engine.running_count(), 50);

        let err = engine.start(ids[50]).await.unwrap_err();
        assert!(matches!(err, EngineError::ResourceExhausted(_)));
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(engine.running_count(), 50);
        assert_eq!(
            engine.get_execution(ids[50]).await.unwrap().status,
            ExecutionStatus::Pending
        );

        executor.release.cancel();
        for id in &ids[..50] {
            assert_eq!(engine.wait(*id).await.unwrap().status, ExecutionStatus::Completed);
        }

        // Slots are returned once runs settle
        engine.start(ids[50]).await.unwrap();
        assert_eq!(engine.wait(ids[50]).await.unwrap().status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn permanent_failure_skips_only_dependents() {
        let executor = ScriptedExecutor::new(|req| {
            if req.task_id == "login" {
                Err(ExecutorFailure::with_kind(ErrorKind::ValidationError, "bad credentials format"))
            } else {
                Ok(json!({}))
            }
        });
        let engine = engine_with(executor.clone(), test_config());
        engine
            .register_workflow(workflow(
                "fail-fast",
                vec![
                    task("login", "type", &[], json!({})),
                    task("open-orders", "click", &["login"], json!({})),
                    task("export", "extract", &["open-orders"], json!({})),
                    task("homepage", "navigate", &[], json!({})),
                ],
            ))
            .await
            .unwrap();

        let execution = engine.run("fail-fast", Map::new()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(status_of(&execution, "login"), TaskStatus::Failed);
        assert_eq!(status_of(&execution, "open-orders"), TaskStatus::Skipped);
        assert_eq!(status_of(&execution, "export"), TaskStatus::Skipped);
        assert_eq!(status_of(&execution, "homepage"), TaskStatus::Completed);
        assert_eq!(execution.task("export").unwrap().attempts, 0);
        assert!(executor.calls_for("open-orders").is_empty());
        assert!(executor.calls_for("export").is_empty());
    }

    #[tokio::test]
    async fn retries_stop_at_max_with_growing_backoff() {
        let executor = ScriptedExecutor::new(|_| Err(ExecutorFailure::new("connection refused")));
        let engine = engine_with(executor.clone(), test_config());
        let mut flaky = task("fetch", "navigate", &[], json!({}));
        flaky.retry_overrides = Some(RetryOverrides {
            max_retries: Some(4),
            base_delay_ms: None,
        });
        engine.register_workflow(workflow("flaky", vec![flaky])).await.unwrap();

        let mut rx = engine.subscribe();
        let execution = engine.run("flaky", Map::new()).await.unwrap();

        let fetch = execution.task("fetch").unwrap();
        assert_eq!(fetch.status, TaskStatus::Failed);
        assert_eq!(fetch.attempts, 4);
        assert_eq!(fetch.error.as_ref().unwrap().kind, ErrorKind::NetworkError);
        assert_eq!(executor.calls().len(), 4);

        let mut delays = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::TaskRetrying { delay_ms, .. } = event {
                delays.push(delay_ms);
            }
        }
        // base 1 ms * 2^n * 3 (network)
        assert_eq!(delays, vec![3, 6, 12]);
    }

    #[tokio::test]
    async fn executor_resource_exhaustion_retries_with_double_backoff() {
        let executor = ScriptedExecutor::new(|req| {
            if req.attempt < 3 {
                Err(ExecutorFailure::with_kind(ErrorKind::ResourceExhausted, "no browser available"))
            } else {
                Ok(json!({"ok": true}))
            }
        });
        let engine = engine_with(executor, test_config());
        engine
            .register_workflow(workflow("busy", vec![task("a", "navigate", &[], json!({}))]))
            .await
            .unwrap();

        let mut rx = engine.subscribe();
        let execution = engine.run("busy", Map::new()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.task("a").unwrap().attempts, 3);

        let mut delays = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::TaskRetrying { delay_ms, .. } = event {
                delays.push(delay_ms);
            }
        }
        assert_eq!(delays, vec![2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_enforced_and_scaled_on_retry() {
        let executor = ScriptedExecutor::new(|_| Ok(json!({"loaded": true})))
            .with_delay(|_| Duration::from_millis(25));
        let engine = engine_with(executor.clone(), test_config());
        engine
            .register_workflow(workflow(
                "slow",
                vec![task("load", "navigate", &[], json!({"timeout_ms": 20}))],
            ))
            .await
            .unwrap();

        let execution = engine.run("slow", Map::new()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.task("load").unwrap().attempts, 2);
        let calls = executor.calls_for("load");
        assert_eq!(calls[0].timeout, Duration::from_millis(20));
        assert_eq!(calls[1].timeout, Duration::from_millis(30));
        assert_eq!(calls[1].parameters["timeout_ms"], json!(30));
    }

    #[tokio::test]
    async fn cancel_stops_new_dispatches_and_keeps_outputs() {
        let executor = GatedExecutor::default();
        let engine = engine_with(executor.clone(), test_config());
        engine
            .register_workflow(workflow(
                "two-step",
                vec![
                    task("first", "navigate", &[], json!({})),
                    task("second", "click", &["first"], json!({})),
                ],
            ))
            .await
            .unwrap();

        let mut rx = engine.subscribe();
        let id = engine.create_execution("two-step", Map::new()).await.unwrap().id;
        engine.start(id).await.unwrap();
        next_matching(&mut rx, |e| matches!(e, ExecutionEvent::TaskStarted { task_id, .. } if task_id == "first")).await;

        engine.cancel(id).await.unwrap();
        // Idempotent while settling
        engine.cancel(id).await.unwrap();
        executor.release.cancel();

        let execution = engine.wait(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(status_of(&execution, "first"), TaskStatus::Completed);
        assert_eq!(execution.variables["first"]["task"], "first");
        assert_eq!(status_of(&execution, "second"), TaskStatus::Skipped);
        assert_eq!(*executor.started.lock().unwrap(), vec!["first".to_string()]);

        // Cancelling a terminal execution is a no-op
        engine.cancel(id).await.unwrap();
        assert_eq!(engine.get_execution(id).await.unwrap().status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_during_backoff_fails_task_with_last_error() {
        let executor = ScriptedExecutor::new(|_| Err(ExecutorFailure::new("network unreachable")));
        let config = EngineConfig {
            base_delay_ms: 60_000,
            ..EngineConfig::default()
        };
        let engine = engine_with(executor, config);
        engine
            .register_workflow(workflow("stuck", vec![task("a", "navigate", &[], json!({}))]))
            .await
            .unwrap();

        let mut rx = engine.subscribe();
        let id = engine.create_execution("stuck", Map::new()).await.unwrap().id;
        engine.start(id).await.unwrap();
        next_matching(&mut rx, |e| matches!(e, ExecutionEvent::TaskRetrying { .. })).await;

        engine.cancel(id).await.unwrap();
        let execution = tokio::time::timeout(Duration::from_secs(5), engine.wait(id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        let a = execution.task("a").unwrap();
        assert_eq!(a.status, TaskStatus::Failed);
        assert_eq!(a.attempts, 1);
        assert_eq!(a.error.as_ref().unwrap().kind, ErrorKind::NetworkError);
    }

    #[tokio::test]
    async fn cancel_pending_execution_and_lifecycle_conflicts() {
        let engine = engine_with(ScriptedExecutor::succeeding(), test_config());
        engine.register_workflow(checkout_flow()).await.unwrap();

        let id = engine.create_execution("checkout", seeds()).await.unwrap().id;
        engine.cancel(id).await.unwrap();

        let execution = engine.get_execution(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.tasks.iter().all(|t| t.status == TaskStatus::Skipped));

        let err = engine.start(id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let missing = Uuid::now_v7();
        assert_eq!(engine.start(missing).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(engine.cancel(missing).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(engine.get_execution(missing).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn double_start_conflicts() {
        let executor = GatedExecutor::default();
        let engine = engine_with(executor.clone(), test_config());
        engine
            .register_workflow(workflow("one", vec![task("a", "navigate", &[], json!({}))]))
            .await
            .unwrap();
        let id = engine.create_execution("one", Map::new()).await.unwrap().id;

        engine.start(id).await.unwrap();
        assert!(matches!(engine.start(id).await.unwrap_err(), EngineError::Conflict(_)));
        assert!(matches!(
            engine.purge_execution(id).await.unwrap_err(),
            EngineError::Conflict(_)
        ));

        executor.release.cancel();
        engine.wait(id).await.unwrap();
        assert!(matches!(engine.start(id).await.unwrap_err(), EngineError::Conflict(_)));

        engine.purge_execution(id).await.unwrap();
        assert_eq!(engine.get_execution(id).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unknown_workflow_and_shadowing_seed() {
        let engine = engine_with(ScriptedExecutor::succeeding(), test_config());
        assert!(matches!(
            engine.create_execution("ghost", Map::new()).await.unwrap_err(),
            EngineError::NotFound(_)
        ));

        engine.register_workflow(checkout_flow()).await.unwrap();
        let mut shadow = seeds();
        shadow.insert("click".into(), json!(1));
        assert!(matches!(
            engine.create_execution("checkout", shadow).await.unwrap_err(),
            EngineError::Validation(_)
        ));
    }

    // ---------------------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------------------

    /// Deterministic pseudo-random DAG: each task depends on up to three
    /// earlier tasks.
    fn random_dag(size: usize, mut seed: u64) -> WorkflowDefinition {
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };
        let tasks = (0..size)
            .map(|i| {
                let mut deps: Vec<String> = Vec::new();
                if i > 0 {
                    for _ in 0..next() % 4 {
                        let dep = format!("t{}", next() % i);
                        if !deps.contains(&dep) {
                            deps.push(dep);
                        }
                    }
                }
                let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
                let parameters = match deps.first() {
                    Some(dep) => json!({"from": format!("${{{dep}.task}}")}),
                    None => json!({}),
                };
                task(&format!("t{i}"), "step", &dep_refs, parameters)
            })
            .collect();
        workflow("random", tasks)
    }

    fn task_index(request: &TaskRequest) -> u64 {
        request.task_id[1..].parse().unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn dependencies_complete_before_dependents_start() {
        for seed in [7, 42, 1234] {
            let executor = ScriptedExecutor::new(|req| {
                if task_index(req) % 7 == 3 && req.attempt == 1 {
                    Err(ExecutorFailure::new("element is not visible"))
                } else {
                    Ok(json!({"task": req.task_id}))
                }
            })
            .with_delay(|req| Duration::from_millis(task_index(req) % 5 * 3));
            let engine = engine_with(executor, test_config());
            let definition = random_dag(50, seed);
            engine.register_workflow(definition.clone()).await.unwrap();

            let execution = engine.run("random", Map::new()).await.unwrap();
            assert_eq!(execution.status, ExecutionStatus::Completed, "seed {seed}");

            for spec in &definition.tasks {
                let result = execution.task(&spec.id).unwrap();
                assert!(result.attempts <= 3);
                for dep in &spec.depends_on {
                    let dep = execution.task(dep).unwrap();
                    assert!(
                        result.started_at.unwrap() >= dep.completed_at.unwrap(),
                        "{} started before {} completed",
                        spec.id,
                        dep.task_id
                    );
                }
            }
        }
    }

    fn comparable(execution: &Execution) -> Vec<(String, TaskStatus, u32, Option<Value>, Option<TaskError>)> {
        execution
            .tasks
            .iter()
            .map(|t| (t.task_id.clone(), t.status, t.attempts, t.output.clone(), t.error.clone()))
            .collect()
    }

    #[tokio::test]
    async fn replay_is_deterministic() {
        let script = |req: &TaskRequest| {
            if task_index(req) % 11 == 5 {
                Err(ExecutorFailure::new("invalid selector syntax"))
            } else {
                Ok(json!({"task": req.task_id, "params": req.parameters}))
            }
        };

        let mut runs = Vec::new();
        for _ in 0..2 {
            let executor = ScriptedExecutor::new(script);
            let engine = engine_with(executor.clone(), test_config());
            engine.register_workflow(random_dag(30, 99)).await.unwrap();
            let execution = engine.run("random", Map::new()).await.unwrap();
            let order: Vec<_> = executor.calls().into_iter().map(|c| c.task_id).collect();
            runs.push((order, comparable(&execution), execution.variables, execution.status));
        }

        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn per_execution_concurrency_is_bounded() {
        let executor = ScriptedExecutor::new(|_| Ok(json!({})))
            .with_delay(|_| Duration::from_millis(10));
        let config = EngineConfig {
            max_task_concurrency: Some(2),
            ..test_config()
        };
        let engine = engine_with(executor.clone(), config);
        let tasks = (0..6)
            .map(|i| task(&format!("t{i}"), "navigate", &[], json!({})))
            .collect();
        engine.register_workflow(workflow("wide", tasks)).await.unwrap();

        let execution = engine.run("wide", Map::new()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 2);

        // Ties break in declaration order
        let order: Vec<_> = executor.calls().into_iter().map(|c| c.task_id).collect();
        assert_eq!(order, vec!["t0", "t1", "t2", "t3", "t4", "t5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_does_not_hold_a_concurrency_slot() {
        let executor = ScriptedExecutor::new(|req| {
            if req.task_id == "a" && req.attempt == 1 {
                Err(ExecutorFailure::new("connection refused"))
            } else {
                Ok(json!({}))
            }
        })
        .with_delay(|req| {
            if req.task_id == "b" {
                Duration::from_secs(5)
            } else {
                Duration::ZERO
            }
        });
        let config = EngineConfig {
            max_task_concurrency: Some(1),
            base_delay_ms: 1_000,
            ..EngineConfig::default()
        };
        let engine = engine_with(executor.clone(), config);
        engine
            .register_workflow(workflow(
                "pair",
                vec![
                    task("a", "navigate", &[], json!({})),
                    task("b", "navigate", &[], json!({})),
                ],
            ))
            .await
            .unwrap();

        let execution = engine.run("pair", Map::new()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.task("a").unwrap().attempts, 2);
        assert_eq!(execution.task("b").unwrap().attempts, 1);

        // b takes the slot during a's 3 s backoff; the retry then waits for b
        let order: Vec<_> = executor.calls().into_iter().map(|c| c.task_id).collect();
        assert_eq!(order, vec!["a", "b", "a"]);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_checkpoint_stops_remaining_dispatches() {
        let executor = ScriptedExecutor::succeeding();
        let repo = SlowCheckpointRepo {
            inner: InMemoryExecutionRepository::new(),
            delay: Duration::from_millis(10),
        };
        let engine = Engine::new(repo, BoxTaskExecutor::new(executor.clone()), test_config());
        let tasks = (0..3)
            .map(|i| task(&format!("t{i}"), "navigate", &[], json!({})))
            .collect();
        engine.register_workflow(workflow("fan-out", tasks)).await.unwrap();

        let id = engine.create_execution("fan-out", Map::new()).await.unwrap().id;
        engine.start(id).await.unwrap();
        // Lands while t0's running checkpoint is still being written
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.cancel(id).await.unwrap();

        let execution = engine.wait(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        let dispatched: Vec<_> = executor.calls().into_iter().map(|c| c.task_id).collect();
        assert_eq!(dispatched, vec!["t0"]);
        assert_eq!(status_of(&execution, "t0"), TaskStatus::Completed);
        for task_id in ["t1", "t2"] {
            let result = execution.task(task_id).unwrap();
            assert_eq!(result.status, TaskStatus::Skipped);
            assert_eq!(result.attempts, 0);
        }
    }

    // ---------------------------------------------------------------------------
    // Recovery, events, shutdown
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn recover_marks_orphaned_runs_failed() {
        let repo = InMemoryExecutionRepository::new();
        let orphan = Execution {
            id: Uuid::now_v7(),
            workflow_id: "checkout".into(),
            status: ExecutionStatus::Running,
            variables: Map::new(),
            started_at: Some(chrono::Utc::now()),
            completed_at: None,
            error: None,
            tasks: Vec::new(),
        };
        repo.save_execution(&orphan).await.unwrap();
        let mut running = TaskResult::pending("navigate");
        running.status = TaskStatus::Running;
        running.attempts = 1;
        repo.save_task_result(&orphan.id, &running).await.unwrap();
        repo.save_task_result(&orphan.id, &TaskResult::pending("click")).await.unwrap();

        let engine = Engine::new(
            repo.clone(),
            BoxTaskExecutor::new(ScriptedExecutor::succeeding()),
            test_config(),
        );
        assert_eq!(engine.recover_interrupted().await.unwrap(), 1);
        assert_eq!(engine.recover_interrupted().await.unwrap(), 0);

        let recovered = engine.get_execution(orphan.id).await.unwrap();
        assert_eq!(recovered.status, ExecutionStatus::Failed);
        assert_eq!(recovered.error.as_deref(), Some(INTERRUPTED));
        assert_eq!(status_of(&recovered, "navigate"), TaskStatus::Failed);
        assert_eq!(status_of(&recovered, "click"), TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn events_bracket_the_run() {
        let engine = engine_with(ScriptedExecutor::succeeding(), test_config());
        engine.register_workflow(checkout_flow()).await.unwrap();
        let mut rx = engine.subscribe();

        let execution = engine.run("checkout", seeds()).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.execution_id(), execution.id);
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ExecutionEvent::ExecutionStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::ExecutionFinished {
                status: ExecutionStatus::Completed,
                ..
            })
        ));
        let completed = events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::TaskCompleted { .. }))
            .count();
        assert_eq!(completed, 3);
    }

    #[tokio::test]
    async fn shutdown_drains_runs_and_rejects_new_work() {
        let executor = GatedExecutor::default();
        let engine = Arc::new(engine_with(executor.clone(), test_config()));
        engine
            .register_workflow(workflow("one", vec![task("a", "navigate", &[], json!({}))]))
            .await
            .unwrap();
        let id = engine.create_execution("one", Map::new()).await.unwrap().id;
        engine.start(id).await.unwrap();

        let shutdown = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.shutdown().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            engine.create_execution("one", Map::new()).await.unwrap_err(),
            EngineError::ShuttingDown
        ));

        executor.release.cancel();
        shutdown.await.unwrap();
        assert_eq!(engine.running_count(), 0);
        assert_eq!(engine.get_execution(id).await.unwrap().status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_all_cancels_tracked_runs() {
        let executor = GatedExecutor::default();
        let engine = engine_with(executor.clone(), test_config());
        engine
            .register_workflow(workflow(
                "pair",
                vec![task("a", "navigate", &[], json!({})), task("b", "click", &["a"], json!({}))],
            ))
            .await
            .unwrap();

        let mut rx = engine.subscribe();
        let first = engine.create_execution("pair", Map::new()).await.unwrap().id;
        let second = engine.create_execution("pair", Map::new()).await.unwrap().id;
        engine.start(first).await.unwrap();
        engine.start(second).await.unwrap();
        for _ in 0..2 {
            next_matching(&mut rx, |e| matches!(e, ExecutionEvent::TaskStarted { .. })).await;
        }

        engine.cancel_all();
        executor.release.cancel();

        for id in [first, second] {
            let execution = engine.wait(id).await.unwrap();
            assert_eq!(execution.status, ExecutionStatus::Cancelled);
            assert_eq!(status_of(&execution, "b"), TaskStatus::Skipped);
        }
    }
}
