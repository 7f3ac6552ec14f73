//! # TgFleet Risk
//!
//! Per-account risk control for the fleet:
//! - Admission gate evaluated before every execution attempt
//! - Consecutive-failure counter with per-user cooldown thresholds
//! - Provider error classification (FLOOD_WAIT, PEER_FLOOD, bans, restrictions)
//! - Cron-driven recovery sweeps back to `normal`

pub mod classify;
pub mod cron;
pub mod engine;
pub mod sweeps;

pub use classify::{RiskVerdict, classify_provider_error};
pub use cron::CronSchedule;
pub use engine::{Admission, RiskControl, admit};
pub use sweeps::{RecoveryScheduler, SweepReport, run_all, spawn_recovery_loop};
