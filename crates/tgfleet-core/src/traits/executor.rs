//! Executor strategy trait — one implementation per task type.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::pool::ConnectionHandle;
use crate::error::Result;
use crate::types::{Task, TaskType};

/// Fields a strategy writes into the account's result entry.
pub type ExecutionOutput = Map<String, Value>;

/// A task strategy (send message, check account, join group, ...).
///
/// The scheduler never inspects a strategy; it only hands it to the
/// connection pool, which runs it against a live account session.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Run against one account's connection. `cancel` is the owning task's
    /// token; long strategies may poll it, the scheduler does not rely on it.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        conn: &dyn ConnectionHandle,
    ) -> Result<ExecutionOutput>;
}

/// Builds a strategy for a task, reading whatever it needs from `task.config`.
pub trait ExecutorFactory: Send + Sync {
    fn create(&self, task: &Task) -> Result<Arc<dyn TaskExecutor>>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(&Task) -> Result<Arc<dyn TaskExecutor>> + Send + Sync,
{
    fn create(&self, task: &Task) -> Result<Arc<dyn TaskExecutor>> {
        self(task)
    }
}
