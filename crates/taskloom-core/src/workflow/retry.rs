//! Failure classification and retry decisions.
//!
//! Stateless: `RetryClassifier` maps an executor failure to an `ErrorKind`
//! and, given the task's policy and attempt count, decides whether to retry,
//! how long to wait, and which parameters the next attempt uses. Recovery
//! behaviour per kind lives in a fixed strategy table.

use std::time::Duration;

use serde_json::Value;
use taskloom_types::config::EngineConfig;
use taskloom_types::error::ErrorKind;
use taskloom_types::workflow::{Parameters, TIMEOUT_PARAM, TaskSpec};

use crate::executor::ExecutorFailure;

// ---------------------------------------------------------------------------
// Strategy table
// ---------------------------------------------------------------------------

/// How a retry changes the task's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    None,
    /// Merge the next entry of `alternative_parameters` over the parameters.
    NextAlternative,
    /// Grow the `timeout_ms` parameter by the configured scale.
    ScaleTimeout,
}

/// Recovery policy for one error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub retryable: bool,
    pub backoff_multiplier: u32,
    pub mutation: Mutation,
}

const fn strategy(retryable: bool, backoff_multiplier: u32, mutation: Mutation) -> Strategy {
    Strategy {
        retryable,
        backoff_multiplier,
        mutation,
    }
}

/// Strategy for each kind. `NotFound` and `Conflict` never reach a task and
/// are listed only for completeness.
pub const fn strategy_for(kind: ErrorKind) -> Strategy {
    match kind {
        ErrorKind::ElementNotFound => strategy(true, 1, Mutation::NextAlternative),
        ErrorKind::Timeout => strategy(true, 1, Mutation::ScaleTimeout),
        ErrorKind::NetworkError => strategy(true, 3, Mutation::None),
        ErrorKind::NotActionable => strategy(true, 2, Mutation::None),
        ErrorKind::ResourceExhausted => strategy(true, 2, Mutation::None),
        ErrorKind::Default => strategy(true, 1, Mutation::None),
        ErrorKind::ValidationError | ErrorKind::NotFound | ErrorKind::Conflict => {
            strategy(false, 0, Mutation::None)
        }
    }
}

/// Message fragments per kind, checked in priority order (first match wins).
const PATTERNS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::ElementNotFound,
        &[
            "element not found",
            "no such element",
            "unable to locate",
            "could not find element",
            "selector not found",
            "waiting for selector",
            "no node found",
        ],
    ),
    (
        ErrorKind::Timeout,
        &["timed out", "timeout", "deadline exceeded"],
    ),
    (
        ErrorKind::NetworkError,
        &[
            "network",
            "connection refused",
            "connection reset",
            "connection closed",
            "net::err",
            "dns",
            "unreachable",
        ],
    ),
    (
        ErrorKind::NotActionable,
        &[
            "not visible",
            "not interactable",
            "not clickable",
            "not editable",
            "is disabled",
            "obscured",
            "intercepts pointer events",
            "not attached",
            "not ready",
        ],
    ),
    (
        ErrorKind::ValidationError,
        &["invalid", "malformed", "validation", "missing required"],
    ),
    (
        ErrorKind::ResourceExhausted,
        &[
            "resource exhausted",
            "too many",
            "no capacity",
            "rate limit",
            "pool exhausted",
        ],
    ),
];

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Effective retry settings for one task: engine defaults plus overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum total attempts.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout_scale: f64,
    /// Executor timeout when the parameters carry none.
    pub task_timeout: Duration,
}

impl RetryPolicy {
    pub fn for_task(config: &EngineConfig, task: &TaskSpec) -> Self {
        let overrides = task.retry_overrides.unwrap_or_default();
        Self {
            max_retries: overrides
                .max_retries
                .unwrap_or(config.default_max_retries)
                .max(1),
            base_delay: Duration::from_millis(
                overrides.base_delay_ms.unwrap_or(config.base_delay_ms),
            ),
            timeout_scale: config.timeout_scale,
            task_timeout: Duration::from_secs(
                task.timeout_secs.unwrap_or(config.default_task_timeout_secs),
            ),
        }
    }

    /// Timeout for a dispatch: the numeric `timeout_ms` parameter if present,
    /// else the task's own timeout.
    pub fn timeout_for(&self, parameters: &Parameters) -> Duration {
        parameters
            .get(TIMEOUT_PARAM)
            .and_then(Value::as_f64)
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| Duration::from_millis(ms.round() as u64))
            .unwrap_or(self.task_timeout)
    }
}

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

/// Outcome of a failed attempt. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
    /// Parameters for the next attempt (unchanged when not retrying).
    pub mutated_parameters: Parameters,
}

// ---------------------------------------------------------------------------
// RetryClassifier
// ---------------------------------------------------------------------------

/// Stateless classifier; all logic is in associated functions.
pub struct RetryClassifier;

impl RetryClassifier {
    /// Classify a failure: an explicit kind hint wins, otherwise the message
    /// is matched against the pattern table in priority order.
    pub fn classify(failure: &ExecutorFailure) -> ErrorKind {
        match failure.kind {
            Some(ErrorKind::NotFound | ErrorKind::Conflict) => ErrorKind::Default,
            Some(kind) => kind,
            None => Self::classify_message(&failure.message),
        }
    }

    pub fn classify_message(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();
        PATTERNS
            .iter()
            .find(|(_, fragments)| fragments.iter().any(|f| lower.contains(f)))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Default)
    }

    /// `base * 2^retry_index * multiplier`, with saturating arithmetic.
    pub fn backoff_delay(base: Duration, retry_index: u32, multiplier: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry_index)
            .unwrap_or(u32::MAX)
            .saturating_mul(multiplier);
        base.saturating_mul(factor)
    }

    /// Decide what happens after attempt number `attempt` (1-based) failed.
    ///
    /// Retries are allowed while `attempt < policy.max_retries`. The retry
    /// index used for backoff and alternative selection is `attempt - 1`.
    pub fn decide(
        kind: ErrorKind,
        attempt: u32,
        task: &TaskSpec,
        current: &Parameters,
        policy: &RetryPolicy,
    ) -> RetryDecision {
        let strategy = strategy_for(kind);
        if !strategy.retryable || attempt >= policy.max_retries {
            return RetryDecision {
                should_retry: false,
                delay: Duration::ZERO,
                mutated_parameters: current.clone(),
            };
        }

        let retry_index = attempt.saturating_sub(1);
        let mutated_parameters = match strategy.mutation {
            Mutation::None => current.clone(),
            Mutation::NextAlternative => next_alternative(task, current, retry_index),
            Mutation::ScaleTimeout => scale_timeout(current, policy),
        };

        RetryDecision {
            should_retry: true,
            delay: Self::backoff_delay(policy.base_delay, retry_index, strategy.backoff_multiplier),
            mutated_parameters,
        }
    }
}

/// Overlay `alternative_parameters[min(index, len - 1)]`; without
/// alternatives the parameters are reused as-is.
fn next_alternative(task: &TaskSpec, current: &Parameters, retry_index: u32) -> Parameters {
    let alternatives = &task.alternative_parameters;
    let mut next = current.clone();
    if let Some(last) = alternatives.len().checked_sub(1) {
        let idx = (retry_index as usize).min(last);
        for (key, value) in &alternatives[idx] {
            next.insert(key.clone(), value.clone());
        }
    }
    next
}

fn scale_timeout(current: &Parameters, policy: &RetryPolicy) -> Parameters {
    let base_ms = policy.timeout_for(current).as_millis() as f64;
    let scaled = (base_ms * policy.timeout_scale).round().min(u64::MAX as f64) as u64;
    let mut next = current.clone();
    next.insert(TIMEOUT_PARAM.to_string(), Value::from(scaled));
    next
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
