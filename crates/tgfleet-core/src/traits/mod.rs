//! Seams to external collaborators.

pub mod executor;
pub mod pool;
pub mod repository;

pub use executor::{ExecutionOutput, ExecutorFactory, TaskExecutor};
pub use pool::{ConnectionHandle, ConnectionPool, ConnectionStatus};
pub use repository::{
    AccountRepository, RiskSettingsRepository, TaskLogSink, TaskRepository, TaskUpdate,
};
