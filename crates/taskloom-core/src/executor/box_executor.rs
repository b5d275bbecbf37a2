//! BoxTaskExecutor -- object-safe dynamic dispatch wrapper for TaskExecutor.
//!
//! 1. `TaskExecutorDyn` is the object-safe twin with boxed futures
//! 2. Blanket impl of `TaskExecutorDyn` for all `T: TaskExecutor`
//! 3. `BoxTaskExecutor` wraps `Box<dyn TaskExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::{ExecutorFailure, TaskExecutor, TaskRequest};

/// Object-safe version of [`TaskExecutor`] with boxed futures.
pub trait TaskExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        request: &'a TaskRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExecutorFailure>> + Send + 'a>>;
}

impl<T: TaskExecutor> TaskExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        request: &'a TaskRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExecutorFailure>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

/// Type-erased task executor, selected at runtime (HTTP, scripted, ...).
pub struct BoxTaskExecutor {
    inner: Box<dyn TaskExecutorDyn + Send + Sync>,
}

impl BoxTaskExecutor {
    pub fn new<T: TaskExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn execute(&self, request: &TaskRequest) -> Result<Value, ExecutorFailure> {
        self.inner.execute_boxed(request).await
    }
}

impl std::fmt::Debug for BoxTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskExecutor").finish_non_exhaustive()
    }
}
