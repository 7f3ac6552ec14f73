//! Persistence contracts consumed by the scheduler and risk engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::{
    Account, AccountId, AccountStatus, RiskSettings, Task, TaskId, TaskLogEntry, TaskStatus,
    UserId,
};

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    /// Set status; `cooling_until` is stored only for `Cooling` and cleared otherwise.
    async fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        cooling_until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Atomically increment and return the new consecutive-failure count.
    async fn increment_failures(&self, id: AccountId) -> Result<u32>;

    async fn reset_failures(&self, id: AccountId) -> Result<()>;

    /// Accounts in `cooling` whose `cooling_until` is at or before `now`.
    async fn find_expired_cooling(&self, now: DateTime<Utc>) -> Result<Vec<Account>>;

    /// Accounts in `warning` last updated before `older_than`.
    async fn find_stale_warnings(&self, older_than: DateTime<Utc>) -> Result<Vec<Account>>;
}

/// Partial task update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Map<String, Value>>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;

    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()>;

    async fn update_fields(&self, id: TaskId, update: TaskUpdate) -> Result<()>;
}

#[async_trait]
pub trait RiskSettingsRepository: Send + Sync {
    /// `None` when the user has nothing configured.
    async fn get_settings(&self, user_id: UserId) -> Result<Option<RiskSettings>>;

    /// Implementations store validated values.
    async fn save_settings(&self, user_id: UserId, settings: RiskSettings) -> Result<()>;
}

/// Append-only operational log.
#[async_trait]
pub trait TaskLogSink: Send + Sync {
    async fn append(&self, entry: TaskLogEntry) -> Result<()>;
}
