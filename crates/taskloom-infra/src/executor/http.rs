//! HttpTaskExecutor -- [`TaskExecutor`] that forwards dispatches to a remote
//! agent service.
//!
//! Each dispatch is a `POST {base_url}/execute` with the serialized
//! [`TaskRequest`] as body. The service answers with `{"output": ...}` on
//! success or `{"error": {"kind": "...", "message": "..."}}` on failure.
//! Bare HTTP errors are mapped to error kinds by status code so the retry
//! classifier can pick a strategy without parsing messages.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use taskloom_core::executor::{ExecutorFailure, TaskExecutor, TaskRequest};
use taskloom_types::error::ErrorKind;

/// Upper bound on connection setup, independent of per-task timeouts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpTaskExecutor {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    #[serde(default)]
    kind: Option<String>,
    message: String,
}

impl HttpTaskExecutor {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self) -> String {
        format!("{}/execute", self.base_url.trim_end_matches('/'))
    }
}

impl TaskExecutor for HttpTaskExecutor {
    async fn execute(&self, request: &TaskRequest) -> Result<Value, ExecutorFailure> {
        tracing::debug!(
            url = %self.url(),
            task_id = %request.task_id,
            attempt = request.attempt,
            "forwarding task"
        );

        let response = self
            .client
            .post(self.url())
            .timeout(request.timeout)
            .json(request)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_failure)?;
        interpret(status, &body)
    }
}

// ---------------------------------------------------------------------------
// Response mapping
// ---------------------------------------------------------------------------

fn transport_failure(e: reqwest::Error) -> ExecutorFailure {
    if e.is_timeout() {
        ExecutorFailure::with_kind(ErrorKind::Timeout, format!("executor request timed out: {e}"))
    } else if e.is_connect() {
        ExecutorFailure::with_kind(ErrorKind::NetworkError, format!("executor unreachable: {e}"))
    } else {
        ExecutorFailure::new(format!("executor request failed: {e}"))
    }
}

fn kind_for_status(status: StatusCode) -> Option<ErrorKind> {
    match status.as_u16() {
        408 | 504 => Some(ErrorKind::Timeout),
        429 | 503 => Some(ErrorKind::ResourceExhausted),
        400 | 422 => Some(ErrorKind::ValidationError),
        _ => None,
    }
}

/// Map an HTTP response to the task output or a failure. A structured
/// `error` body wins over the status code.
fn interpret(status: StatusCode, body: &str) -> Result<Value, ExecutorFailure> {
    let parsed = serde_json::from_str::<ExecuteResponse>(body).ok();

    if let Some(ExecuteResponse {
        error: Some(remote), ..
    }) = &parsed
    {
        // Unknown kinds fall back to message classification
        let kind = remote
            .kind
            .as_deref()
            .and_then(|k| k.parse::<ErrorKind>().ok())
            .or_else(|| kind_for_status(status));
        return Err(ExecutorFailure {
            kind,
            message: remote.message.clone(),
        });
    }

    if !status.is_success() {
        return Err(ExecutorFailure {
            kind: kind_for_status(status),
            message: format!("HTTP {status}: {}", body.trim()),
        });
    }

    match parsed {
        Some(response) => Ok(response.output.unwrap_or(Value::Null)),
        None => Err(ExecutorFailure::with_kind(
            ErrorKind::ValidationError,
            format!("malformed executor response: {}", body.trim()),
        )),
    }
}
