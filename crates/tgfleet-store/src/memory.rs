//! In-memory store — same contracts as [`crate::SqliteStore`], nothing on disk.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tgfleet_core::error::{FleetError, Result};
use tgfleet_core::traits::{
    AccountRepository, RiskSettingsRepository, TaskLogSink, TaskRepository, TaskUpdate,
};
use tgfleet_core::types::{
    Account, AccountId, AccountStatus, RiskSettings, Task, TaskId, TaskLogEntry, TaskStatus,
    UserId,
};

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    tasks: HashMap<TaskId, Task>,
    settings: HashMap<UserId, RiskSettings>,
    logs: Vec<TaskLogEntry>,
}

/// Mutex-guarded maps implementing every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| FleetError::storage(format!("Lock: {e}")))
    }

    pub fn insert_account(&self, account: Account) -> Result<()> {
        self.lock()?.accounts.insert(account.id, account);
        Ok(())
    }

    pub fn insert_task(&self, task: Task) -> Result<()> {
        self.lock()?.tasks.insert(task.id, task);
        Ok(())
    }

    /// Snapshot of an account.
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.lock().ok()?.accounts.get(&id).cloned()
    }

    /// Snapshot of a task.
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.lock().ok()?.tasks.get(&id).cloned()
    }

    /// Mutate an account in place (test setup).
    pub fn with_account<F: FnOnce(&mut Account)>(&self, id: AccountId, f: F) -> Result<()> {
        let mut state = self.lock()?;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| FleetError::NotFound(format!("account {id}")))?;
        f(account);
        Ok(())
    }

    /// All log entries, oldest first.
    pub fn logs(&self) -> Vec<TaskLogEntry> {
        self.lock().map(|s| s.logs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    async fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        cooling_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_account(id, |acc| {
            acc.status = status;
            acc.cooling_until = if status == AccountStatus::Cooling {
                cooling_until
            } else {
                None
            };
            acc.updated_at = Utc::now();
        })
    }

    async fn increment_failures(&self, id: AccountId) -> Result<u32> {
        let mut count = 0;
        self.with_account(id, |acc| {
            acc.consecutive_failures += 1;
            count = acc.consecutive_failures;
        })?;
        Ok(count)
    }

    async fn reset_failures(&self, id: AccountId) -> Result<()> {
        self.with_account(id, |acc| acc.consecutive_failures = 0)
    }

    async fn find_expired_cooling(&self, now: DateTime<Utc>) -> Result<Vec<Account>> {
        let mut found: Vec<Account> = self
            .lock()?
            .accounts
            .values()
            .filter(|a| a.status == AccountStatus::Cooling)
            .filter(|a| a.cooling_until.is_none_or(|until| until <= now))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.id);
        Ok(found)
    }

    async fn find_stale_warnings(&self, older_than: DateTime<Utc>) -> Result<Vec<Account>> {
        let mut found: Vec<Account> = self
            .lock()?
            .accounts
            .values()
            .filter(|a| a.status == AccountStatus::Warning && a.updated_at <= older_than)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.id);
        Ok(found)
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.lock()?.tasks.get(&id).cloned())
    }

    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        self.update_fields(id, TaskUpdate::status(status)).await
    }

    async fn update_fields(&self, id: TaskId, update: TaskUpdate) -> Result<()> {
        let mut state = self.lock()?;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| FleetError::NotFound(format!("task {id}")))?;
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(ts) = update.started_at {
            task.started_at = Some(ts);
        }
        if let Some(ts) = update.completed_at {
            task.completed_at = Some(ts);
        }
        if let Some(result) = update.result {
            task.result = result;
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }
        Ok(())
    }
}

#[async_trait]
impl RiskSettingsRepository for MemoryStore {
    async fn get_settings(&self, user_id: UserId) -> Result<Option<RiskSettings>> {
        Ok(self
            .lock()?
            .settings
            .get(&user_id)
            .copied()
            .map(RiskSettings::validated))
    }

    async fn save_settings(&self, user_id: UserId, settings: RiskSettings) -> Result<()> {
        self.lock()?.settings.insert(user_id, settings.validated());
        Ok(())
    }
}

#[async_trait]
impl TaskLogSink for MemoryStore {
    async fn append(&self, entry: TaskLogEntry) -> Result<()> {
        self.lock()?.logs.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_update_missing_task_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_task_status(42, TaskStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_cooling_filter() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut a = Account::new(1, 1, "+1").with_status(AccountStatus::Cooling);
        a.cooling_until = Some(now - Duration::seconds(5));
        let mut b = Account::new(2, 1, "+2").with_status(AccountStatus::Cooling);
        b.cooling_until = Some(now + Duration::seconds(500));
        store.insert_account(a).unwrap();
        store.insert_account(b).unwrap();

        let found = store.find_expired_cooling(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
    }

    #[tokio::test]
    async fn test_increment_is_sequential() {
        let store = MemoryStore::new();
        store.insert_account(Account::new(1, 1, "+1")).unwrap();
        for expected in 1..=4 {
            assert_eq!(store.increment_failures(1).await.unwrap(), expected);
        }
    }
}
