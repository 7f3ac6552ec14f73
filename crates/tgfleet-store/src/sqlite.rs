//! SQLite-backed persistence for accounts, tasks, risk settings and task logs.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use tgfleet_core::error::{FleetError, Result};
use tgfleet_core::traits::{
    AccountRepository, RiskSettingsRepository, TaskLogSink, TaskRepository, TaskUpdate,
};
use tgfleet_core::types::{
    Account, AccountId, AccountStatus, LogLevel, RiskSettings, Task, TaskId, TaskLogEntry,
    TaskStatus, TaskType, UserId,
};

const ACCOUNT_COLUMNS: &str =
    "id, user_id, phone, status, consecutive_failures, cooling_until, created_at, updated_at";

const TASK_COLUMNS: &str = "id, user_id, task_type, status, priority, account_targets, config, \
     result, error, created_at, started_at, completed_at";

/// SQLite store: one connection behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the fleet database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| FleetError::storage(format!("DB open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let store = Self::with_connection(conn)?;
        tracing::debug!("🗄️ Fleet database opened: {}", path.display());
        Ok(store)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FleetError::storage(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FleetError::storage(format!("Lock: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                phone TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'new',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                cooling_until TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_status ON accounts(status);

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                task_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                account_targets TEXT NOT NULL DEFAULT '[]',  -- JSON array of account ids
                config TEXT NOT NULL DEFAULT '{}',
                result TEXT NOT NULL DEFAULT '{}',
                error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS risk_settings (
                user_id INTEGER PRIMARY KEY,
                max_consecutive_failures INTEGER NOT NULL,
                cooling_duration_minutes INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER,
                account_id INTEGER,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs(task_id);
         ",
            )
            .map_err(|e| FleetError::storage(format!("Migration: {e}")))
    }

    // ─── Direct CRUD (outside the repository traits) ─────────────

    /// Insert or replace an account.
    pub fn insert_account(&self, account: &Account) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO accounts
                 (id, user_id, phone, status, consecutive_failures, cooling_until, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    account.id,
                    account.user_id,
                    account.phone,
                    account.status.as_str(),
                    account.consecutive_failures,
                    account.cooling_until.map(fmt_ts),
                    fmt_ts(account.created_at),
                    fmt_ts(account.updated_at),
                ],
            )
            .map_err(|e| FleetError::storage(format!("Save account: {e}")))?;
        Ok(())
    }

    /// Insert or replace a task.
    pub fn insert_task(&self, task: &Task) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO tasks
                 (id, user_id, task_type, status, priority, account_targets, config, result,
                  error, created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    task.id,
                    task.user_id,
                    task.task_type.as_str(),
                    task.status.as_str(),
                    task.priority,
                    serde_json::to_string(&task.account_targets)?,
                    Value::Object(task.config.clone()).to_string(),
                    Value::Object(task.result.clone()).to_string(),
                    task.error,
                    fmt_ts(task.created_at),
                    task.started_at.map(fmt_ts),
                    task.completed_at.map(fmt_ts),
                ],
            )
            .map_err(|e| FleetError::storage(format!("Save task: {e}")))?;
        Ok(())
    }

    /// All accounts ordered by id.
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"))
            .map_err(|e| FleetError::storage(format!("List accounts: {e}")))?;
        let rows = stmt
            .query_map([], row_to_account)
            .map_err(|e| FleetError::storage(format!("List accounts: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Tasks in a given status, oldest first.
    pub fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 ORDER BY created_at, id"
            ))
            .map_err(|e| FleetError::storage(format!("List tasks: {e}")))?;
        let rows = stmt
            .query_map([status.as_str()], row_to_task)
            .map_err(|e| FleetError::storage(format!("List tasks: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Most recent log entries, newest first.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<TaskLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT task_id, account_id, level, message, created_at
                 FROM task_logs ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| FleetError::storage(format!("Recent logs: {e}")))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                let level: String = row.get(2)?;
                Ok(TaskLogEntry {
                    task_id: row.get(0)?,
                    account_id: row.get(1)?,
                    level: match level.as_str() {
                        "warn" => LogLevel::Warn,
                        "error" => LogLevel::Error,
                        _ => LogLevel::Info,
                    },
                    message: row.get(3)?,
                    created_at: parse_ts(&row.get::<_, String>(4)?, "task_logs.created_at"),
                })
            })
            .map_err(|e| FleetError::storage(format!("Recent logs: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn query_accounts(&self, sql: &str, bound: String) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| FleetError::storage(format!("Query accounts: {e}")))?;
        let rows = stmt
            .query_map([bound], row_to_account)
            .map_err(|e| FleetError::storage(format!("Query accounts: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[async_trait]
impl AccountRepository for SqliteStore {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.lock()?
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                [id],
                row_to_account,
            )
            .optional()
            .map_err(|e| FleetError::storage(format!("Get account: {e}")))
    }

    async fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        cooling_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let cooling_until = if status == AccountStatus::Cooling {
            cooling_until.map(fmt_ts)
        } else {
            None
        };
        let changed = self
            .lock()?
            .execute(
                "UPDATE accounts SET status = ?1, cooling_until = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), cooling_until, fmt_ts(Utc::now()), id],
            )
            .map_err(|e| FleetError::storage(format!("Update account status: {e}")))?;
        if changed == 0 {
            return Err(FleetError::NotFound(format!("account {id}")));
        }
        Ok(())
    }

    async fn increment_failures(&self, id: AccountId) -> Result<u32> {
        self.lock()?
            .query_row(
                "UPDATE accounts SET consecutive_failures = consecutive_failures + 1
                 WHERE id = ?1 RETURNING consecutive_failures",
                [id],
                |row| row.get::<_, u32>(0),
            )
            .optional()
            .map_err(|e| FleetError::storage(format!("Increment failures: {e}")))?
            .ok_or_else(|| FleetError::NotFound(format!("account {id}")))
    }

    async fn reset_failures(&self, id: AccountId) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE accounts SET consecutive_failures = 0 WHERE id = ?1",
                [id],
            )
            .map_err(|e| FleetError::storage(format!("Reset failures: {e}")))?;
        Ok(())
    }

    async fn find_expired_cooling(&self, now: DateTime<Utc>) -> Result<Vec<Account>> {
        self.query_accounts(
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts
                 WHERE status = 'cooling' AND (cooling_until IS NULL OR cooling_until <= ?1)
                 ORDER BY id"
            ),
            fmt_ts(now),
        )
    }

    async fn find_stale_warnings(&self, older_than: DateTime<Utc>) -> Result<Vec<Account>> {
        self.query_accounts(
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts
                 WHERE status = 'warning'
                   AND (updated_at <= ?1 OR julianday(updated_at) IS NULL)
                 ORDER BY id"
            ),
            fmt_ts(older_than),
        )
    }
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.lock()?
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                row_to_task,
            )
            .optional()
            .map_err(|e| FleetError::storage(format!("Get task: {e}")))
    }

    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        self.update_fields(id, TaskUpdate::status(status)).await
    }

    async fn update_fields(&self, id: TaskId, update: TaskUpdate) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE tasks SET
                    status = COALESCE(?1, status),
                    started_at = COALESCE(?2, started_at),
                    completed_at = COALESCE(?3, completed_at),
                    result = COALESCE(?4, result),
                    error = COALESCE(?5, error)
                 WHERE id = ?6",
                params![
                    update.status.map(|s| s.as_str()),
                    update.started_at.map(fmt_ts),
                    update.completed_at.map(fmt_ts),
                    update.result.map(|r| Value::Object(r).to_string()),
                    update.error,
                    id,
                ],
            )
            .map_err(|e| FleetError::storage(format!("Update task: {e}")))?;
        if changed == 0 {
            return Err(FleetError::NotFound(format!("task {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RiskSettingsRepository for SqliteStore {
    async fn get_settings(&self, user_id: UserId) -> Result<Option<RiskSettings>> {
        let settings = self
            .lock()?
            .query_row(
                "SELECT max_consecutive_failures, cooling_duration_minutes
                 FROM risk_settings WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(RiskSettings {
                        max_consecutive_failures: row.get(0)?,
                        cooling_duration_minutes: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|e| FleetError::storage(format!("Get risk settings: {e}")))?;
        Ok(settings.map(RiskSettings::validated))
    }

    async fn save_settings(&self, user_id: UserId, settings: RiskSettings) -> Result<()> {
        let settings = settings.validated();
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO risk_settings
                 (user_id, max_consecutive_failures, cooling_duration_minutes, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    user_id,
                    settings.max_consecutive_failures,
                    settings.cooling_duration_minutes,
                    fmt_ts(Utc::now()),
                ],
            )
            .map_err(|e| FleetError::storage(format!("Save risk settings: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl TaskLogSink for SqliteStore {
    async fn append(&self, entry: TaskLogEntry) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO task_logs (task_id, account_id, level, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.task_id,
                    entry.account_id,
                    entry.level.as_str(),
                    entry.message,
                    fmt_ts(entry.created_at),
                ],
            )
            .map_err(|e| FleetError::storage(format!("Append log: {e}")))?;
        Ok(())
    }
}

// ─── Row mapping ──────────────────────────────────────

/// Fixed-width UTC timestamps so TEXT comparison matches time order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Unparseable timestamps read as the epoch, so they look stale rather than fresh.
fn parse_ts(s: &str, column: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!("⚠️ Bad timestamp in {column} ({s:?}): {e}, reading as epoch");
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

fn parse_ts_opt(s: Option<String>, column: &str) -> Option<DateTime<Utc>> {
    let s = s?;
    match DateTime::parse_from_rfc3339(&s) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!("⚠️ Bad timestamp in {column} ({s:?}): {e}, reading as unset");
            None
        }
    }
}

fn parse_object(s: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let id: AccountId = row.get(0)?;
    let status: String = row.get(3)?;
    let status = status.parse().unwrap_or_else(|e| {
        tracing::warn!(account_id = id, "⚠️ {e}, reading account as maintenance");
        AccountStatus::Maintenance
    });
    Ok(Account {
        id,
        user_id: row.get(1)?,
        phone: row.get(2)?,
        status,
        consecutive_failures: row.get(4)?,
        cooling_until: parse_ts_opt(row.get(5)?, "accounts.cooling_until"),
        created_at: parse_ts(&row.get::<_, String>(6)?, "accounts.created_at"),
        updated_at: parse_ts(&row.get::<_, String>(7)?, "accounts.updated_at"),
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let task_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let targets: String = row.get(5)?;
    let task_type = task_type.parse::<TaskType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let id: TaskId = row.get(0)?;
    let status = status.parse().unwrap_or_else(|e| {
        tracing::warn!(task_id = id, "⚠️ {e}, reading task as failed");
        TaskStatus::Failed
    });
    Ok(Task {
        id,
        user_id: row.get(1)?,
        task_type,
        status,
        priority: row.get(4)?,
        account_targets: serde_json::from_str(&targets).unwrap_or_default(),
        config: parse_object(&row.get::<_, String>(6)?),
        result: parse_object(&row.get::<_, String>(7)?),
        error: row.get(8)?,
        created_at: parse_ts(&row.get::<_, String>(9)?, "tasks.created_at"),
        started_at: parse_ts_opt(row.get(10)?, "tasks.started_at"),
        completed_at: parse_ts_opt(row.get(11)?, "tasks.completed_at"),
    })
}
