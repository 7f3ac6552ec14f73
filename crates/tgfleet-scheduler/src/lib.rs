//! # TgFleet Scheduler
//!
//! In-memory task scheduling across a fleet of accounts:
//! - **queue**: single global FIFO of submitted tasks
//! - **cancel**: task ID → cancellation token for in-flight tasks
//! - **executors**: task type → strategy factory
//! - **engine**: dispatch loop under a global concurrency ceiling, stop, shutdown drain
//! - **runner**: sequential per-account fan-out gated by risk control
//! - **aggregate**: per-account outcomes → task status and result payload

pub mod aggregate;
pub mod cancel;
pub mod engine;
pub mod executors;
pub mod queue;
pub mod runner;

pub use aggregate::RunSummary;
pub use cancel::CancellationRegistry;
pub use engine::{SchedulerDeps, SchedulerStats, StopOutcome, TaskScheduler};
pub use executors::ExecutorRegistry;
pub use queue::TaskQueue;
