//! Append-only task/account log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_id: Option<TaskId>,
    pub account_id: Option<AccountId>,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl TaskLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            account_id: None,
            level,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn for_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }
}
