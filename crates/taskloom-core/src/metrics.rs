//! OpenTelemetry instruments for task and execution activity.
//!
//! Instruments are built from a `Meter`; the engine uses the global meter
//! provider, so nothing is exported unless a binary installs one (see
//! `taskloom-observe`). Without a provider every call is a no-op.

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use taskloom_types::error::ErrorKind;
use taskloom_types::execution::ExecutionStatus;

/// Instrumentation scope name.
pub const METER_NAME: &str = "taskloom";

#[derive(Clone)]
pub struct EngineMetrics {
    tasks_created: Counter<u64>,
    tasks_completed: Counter<u64>,
    tasks_failed: Counter<u64>,
    active_tasks: UpDownCounter<i64>,
    execution_duration: Histogram<f64>,
}

impl EngineMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            tasks_created: meter
                .u64_counter("taskloom.tasks.created")
                .with_description("Tasks created with new executions")
                .build(),
            tasks_completed: meter
                .u64_counter("taskloom.tasks.completed")
                .with_description("Tasks that completed successfully")
                .build(),
            tasks_failed: meter
                .u64_counter("taskloom.tasks.failed")
                .with_description("Tasks that failed permanently")
                .build(),
            active_tasks: meter
                .i64_up_down_counter("taskloom.tasks.active")
                .with_description("Executor attempts currently in flight")
                .build(),
            execution_duration: meter
                .f64_histogram("taskloom.execution.duration")
                .with_description("Wall time of finished executions")
                .with_unit("s")
                .build(),
        }
    }

    /// Instruments from the global meter provider. Instruments built before
    /// a provider is installed stay no-ops.
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter(METER_NAME))
    }

    pub fn tasks_created(&self, workflow_id: &str, count: usize) {
        self.tasks_created.add(count as u64, &workflow(workflow_id));
    }

    pub fn task_started(&self, workflow_id: &str) {
        self.active_tasks.add(1, &workflow(workflow_id));
    }

    pub fn task_settled(&self, workflow_id: &str) {
        self.active_tasks.add(-1, &workflow(workflow_id));
    }

    pub fn task_completed(&self, workflow_id: &str) {
        self.tasks_completed.add(1, &workflow(workflow_id));
    }

    pub fn task_failed(&self, workflow_id: &str, kind: ErrorKind) {
        self.tasks_failed.add(
            1,
            &[
                KeyValue::new("workflow_id", workflow_id.to_string()),
                KeyValue::new("kind", kind.as_str()),
            ],
        );
    }

    pub fn execution_finished(&self, workflow_id: &str, status: ExecutionStatus, elapsed: Duration) {
        self.execution_duration.record(
            elapsed.as_secs_f64(),
            &[
                KeyValue::new("workflow_id", workflow_id.to_string()),
                KeyValue::new("status", status.as_str()),
            ],
        );
    }
}

fn workflow(workflow_id: &str) -> [KeyValue; 1] {
    [KeyValue::new("workflow_id", workflow_id.to_string())]
}
