//! Task definitions — the unit of work fanned out across accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::account::{AccountId, UserId};
use crate::error::FleetError;

pub type TaskId = i64;

/// A task targeting one or more accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Owner of the task.
    pub user_id: UserId,
    /// Which executor strategy runs this task.
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Advisory only; dispatch order is arrival order.
    #[serde(default)]
    pub priority: i32,
    /// Ordered list of accounts the task fans out to.
    pub account_targets: Vec<AccountId>,
    /// Opaque payload interpreted by the executor.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Result payload. The scheduler owns `per_account_results`,
    /// `success_count`, `fail_count` and `total_accounts`.
    #[serde(default)]
    pub result: Map<String, Value>,
    /// Last error surfaced for a failed task.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(id: TaskId, task_type: TaskType, account_targets: Vec<AccountId>) -> Self {
        Self {
            id,
            user_id: 0,
            task_type,
            status: TaskStatus::Pending,
            priority: 0,
            account_targets,
            config: Map::new(),
            result: Map::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set a single executor config key.
    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }
}

/// Closed set of executor strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Account health / spam-block check.
    Check,
    PrivateMessage,
    Broadcast,
    /// Fetch a login verification code.
    VerifyCode,
    GroupChat,
    JoinGroup,
    /// Scripted multi-account conversation.
    Scenario,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Check,
        TaskType::PrivateMessage,
        TaskType::Broadcast,
        TaskType::VerifyCode,
        TaskType::GroupChat,
        TaskType::JoinGroup,
        TaskType::Scenario,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Check => "check",
            TaskType::PrivateMessage => "private_message",
            TaskType::Broadcast => "broadcast",
            TaskType::VerifyCode => "verify_code",
            TaskType::GroupChat => "group_chat",
            TaskType::JoinGroup => "join_group",
            TaskType::Scenario => "scenario",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FleetError::Validation(format!("Unknown task type: {s}")))
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(FleetError::Validation(format!("Unknown task status: {other}"))),
        }
    }
}

/// Outcome of one account inside a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountOutcome {
    Success,
    Failed,
    Skipped,
}

/// Structured per-account entry under `per_account_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountResult {
    pub status: AccountOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent on this account, in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// Fields written by the executor strategy.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Keys owned by [`AccountResult`]; executor details using them are
/// renamed with an `executor_` prefix.
const RESERVED_KEYS: &[&str] = &["status", "error", "duration_ms"];

impl AccountResult {
    pub fn success(duration_ms: u64, mut details: Map<String, Value>) -> Self {
        for key in RESERVED_KEYS {
            if let Some(value) = details.remove(*key) {
                details.insert(format!("executor_{key}"), value);
            }
        }
        Self {
            status: AccountOutcome::Success,
            error: None,
            duration_ms,
            details,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: AccountOutcome::Failed,
            error: Some(error.into()),
            duration_ms,
            details: Map::new(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: AccountOutcome::Skipped,
            error: Some(reason.into()),
            duration_ms: 0,
            details: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_roundtrip_names() {
        for t in TaskType::ALL {
            let parsed: TaskType = t.as_str().parse().unwrap();
            assert_eq!(parsed, t);
        }
        assert!("teleport".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_account_result_flattens_details() {
        let mut details = Map::new();
        details.insert("message_id".into(), serde_json::json!(42));
        let result = AccountResult::success(120, details);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["message_id"], 42);
        assert_eq!(json["duration_ms"], 120);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_executor_details_cannot_shadow_reserved_fields() {
        let mut details = Map::new();
        details.insert("status".into(), serde_json::json!("failed"));
        details.insert("error".into(), serde_json::json!("partial delivery"));
        details.insert("duration_ms".into(), serde_json::json!(1));
        let result = AccountResult::success(75, details);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
        assert_eq!(json["duration_ms"], 75);
        assert_eq!(json["executor_status"], "failed");
        assert_eq!(json["executor_error"], "partial delivery");
        assert_eq!(json["executor_duration_ms"], 1);
    }
}
