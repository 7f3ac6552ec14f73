//! Data model shared by the scheduler, risk engine and stores.

pub mod account;
pub mod log;
pub mod risk;
pub mod task;

pub use account::{Account, AccountId, AccountStatus, UserId};
pub use log::{LogLevel, TaskLogEntry};
pub use risk::RiskSettings;
pub use task::{AccountOutcome, AccountResult, Task, TaskId, TaskStatus, TaskType};
