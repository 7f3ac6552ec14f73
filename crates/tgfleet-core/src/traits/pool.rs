//! Connection pool contract — owns one live session per account.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::executor::{ExecutionOutput, TaskExecutor};
use crate::error::Result;
use crate::types::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Connecting)
    }
}

/// Opaque handle to an account session, passed to executors.
pub trait ConnectionHandle: Send + Sync {
    fn account_id(&self) -> AccountId;

    /// Lets a strategy downcast to the pool's concrete client type.
    fn as_any(&self) -> &dyn std::any::Any;
}

#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Run `executor` against the account's connection. Calls for the same
    /// account are serialized by the pool.
    async fn execute_task(
        &self,
        account_id: AccountId,
        executor: Arc<dyn TaskExecutor>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput>;

    fn is_account_busy(&self, account_id: AccountId) -> bool;

    fn connection_status(&self, account_id: AccountId) -> ConnectionStatus;
}
