//! # TgFleet Core
//!
//! Shared building blocks for the fleet scheduler:
//! - **config**: TOML configuration with safe defaults
//! - **error**: the crate-wide `FleetError`
//! - **types**: tasks, accounts, risk settings, log entries
//! - **traits**: seams to external collaborators (executors, connection pool, repositories)
//!
//! ## Architecture
//! ```text
//! submit → TaskScheduler (queue + dispatch loop)
//!            └── TaskRunner ── RiskControl::can_execute_task
//!                     ├── ConnectionPool::execute_task(account, executor)
//!                     └── RiskControl::report_task_result / handle_telegram_error
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use types::{
    Account, AccountId, AccountStatus, AccountResult, AccountOutcome, LogLevel, RiskSettings,
    Task, TaskId, TaskLogEntry, TaskStatus, TaskType, UserId,
};
