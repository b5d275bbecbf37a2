//! Configuration types for Taskloom.
//!
//! `AppConfig` represents the top-level `config.toml`; `EngineConfig` holds
//! the orchestration limits and retry defaults. All fields have defaults.

use serde::{Deserialize, Serialize};

/// Orchestration engine limits and retry policy defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Process-wide maximum of simultaneously running executions.
    #[serde(default = "default_max_running_executions")]
    pub max_running_executions: usize,

    /// Maximum in-flight tasks per execution (None = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_task_concurrency: Option<usize>,

    /// Maximum total attempts per task unless overridden by the task.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Backoff base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Executor timeout when neither the task nor its parameters set one.
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,

    /// Growth factor applied to a task's timeout after a timeout failure.
    #[serde(default = "default_timeout_scale")]
    pub timeout_scale: f64,

    /// Capacity of the execution event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_running_executions() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_timeout_scale() -> f64 {
    1.5
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_running_executions: default_max_running_executions(),
            max_task_concurrency: None,
            default_max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            default_task_timeout_secs: default_task_timeout_secs(),
            timeout_scale: default_timeout_scale(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Top-level configuration, loaded from `{data_dir}/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    /// SQLite URL; defaults to `sqlite://{data_dir}/taskloom.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Base URL of a networked task executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_url: Option<String>,

    #[serde(default)]
    pub log_format: LogFormat,
}
