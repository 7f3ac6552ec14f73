//! Recovery sweeps — cron-driven background loop over the risk engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tgfleet_core::config::RecoveryConfig;
use tgfleet_core::error::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cron::CronSchedule;
use crate::engine::RiskControl;

/// Accounts returned to `normal` by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cooling_recovered: usize,
    pub warnings_recovered: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.cooling_recovered + self.warnings_recovered
    }
}

/// Run both sweeps once, regardless of schedule.
pub async fn run_all(risk: &RiskControl) -> Result<SweepReport> {
    Ok(SweepReport {
        cooling_recovered: risk.process_cooling_recovery().await?,
        warnings_recovered: risk.process_warning_recovery().await?,
    })
}

struct Job {
    name: &'static str,
    schedule: CronSchedule,
    next_run: Option<DateTime<Utc>>,
}

impl Job {
    fn new(name: &'static str, expression: &str, now: DateTime<Utc>) -> Result<Self> {
        let schedule = CronSchedule::parse(expression)?;
        let next_run = schedule.next_after(now);
        Ok(Self {
            name,
            schedule,
            next_run,
        })
    }

    /// True when due; advances `next_run` past `now`.
    fn take_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.next_run {
            Some(at) if at <= now => {
                self.next_run = self.schedule.next_after(now);
                if self.next_run.is_none() {
                    tracing::warn!("⚠️ Sweep '{}' has no next run ({})", self.name, self.schedule.expression());
                }
                true
            }
            _ => false,
        }
    }
}

/// Tracks when each sweep is next due.
pub struct RecoveryScheduler {
    risk: Arc<RiskControl>,
    cooling: Job,
    warning: Job,
}

impl RecoveryScheduler {
    pub fn new(risk: Arc<RiskControl>, config: &RecoveryConfig) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            risk,
            cooling: Job::new("cooling", &config.cooling_cron, now)?,
            warning: Job::new("warning", &config.warning_cron, now)?,
        })
    }

    pub fn next_runs(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.cooling.next_run, self.warning.next_run)
    }

    /// Run whichever sweeps are due at `now`. A failing sweep is logged and
    /// retried at its next scheduled time.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        if self.cooling.take_due(now) {
            match self.risk.process_cooling_recovery().await {
                Ok(n) => report.cooling_recovered = n,
                Err(e) => tracing::error!("❌ Cooling recovery sweep failed: {e}"),
            }
        }
        if self.warning.take_due(now) {
            match self.risk.process_warning_recovery().await {
                Ok(n) => report.warnings_recovered = n,
                Err(e) => tracing::error!("❌ Warning recovery sweep failed: {e}"),
            }
        }
        report
    }
}

/// Spawn the sweep loop. Wakes every `check_interval_secs`, stops on `shutdown`.
pub fn spawn_recovery_loop(
    risk: Arc<RiskControl>,
    config: &RecoveryConfig,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let mut scheduler = RecoveryScheduler::new(risk, config)?;
    let check_every = Duration::from_secs(config.check_interval_secs.max(1));

    tracing::info!(
        cooling = %config.cooling_cron,
        warning = %config.warning_cron,
        "⏰ Recovery sweeps started (check every {}s)",
        check_every.as_secs()
    );

    Ok(tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let report = scheduler.tick(Utc::now()).await;
                    if report.total() > 0 {
                        tracing::info!(
                            cooling = report.cooling_recovered,
                            warning = report.warnings_recovered,
                            "🔓 Recovery sweep done"
                        );
                    }
                }
            }
        }
        tracing::info!("🛑 Recovery sweeps stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tgfleet_core::config::RiskConfig;
    use tgfleet_core::types::{Account, AccountStatus};
    use tgfleet_store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<RiskControl>) {
        let store = Arc::new(MemoryStore::new());
        let risk = Arc::new(RiskControl::new(
            store.clone(),
            store.clone(),
            store.clone(),
            RiskConfig::default(),
        ));
        (store, risk)
    }

    fn expired_cooling(id: i64) -> Account {
        let mut acc = Account::new(id, 1, "+1").with_status(AccountStatus::Cooling);
        acc.cooling_until = Some(Utc::now() - ChronoDuration::minutes(1));
        acc
    }

    #[tokio::test]
    async fn test_run_all_counts_both_sweeps() {
        let (store, risk) = setup();
        store.insert_account(expired_cooling(1)).unwrap();
        let mut warn = Account::new(2, 1, "+2").with_status(AccountStatus::Warning);
        warn.updated_at = Utc::now() - ChronoDuration::hours(48);
        store.insert_account(warn).unwrap();

        let report = run_all(&risk).await.unwrap();
        assert_eq!(report.cooling_recovered, 1);
        assert_eq!(report.warnings_recovered, 1);
        assert_eq!(run_all(&risk).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_tick_only_runs_due_sweeps() {
        let (store, risk) = setup();
        store.insert_account(expired_cooling(1)).unwrap();
        let mut scheduler = RecoveryScheduler::new(risk, &RecoveryConfig::default()).unwrap();

        // Nothing is due before the first cron minute.
        let report = scheduler.tick(Utc::now() - ChronoDuration::minutes(1)).await;
        assert_eq!(report, SweepReport::default());
        assert_eq!(store.account(1).unwrap().status, AccountStatus::Cooling);

        let later = Utc::now() + ChronoDuration::hours(2);
        let report = scheduler.tick(later).await;
        assert_eq!(report.cooling_recovered, 1);
        assert_eq!(store.account(1).unwrap().status, AccountStatus::Normal);

        let (cooling_next, warning_next) = scheduler.next_runs();
        assert!(cooling_next.unwrap() > later);
        assert!(warning_next.unwrap() > later);
    }

    #[tokio::test]
    async fn test_invalid_cron_is_config_error() {
        let (_store, risk) = setup();
        let config = RecoveryConfig {
            cooling_cron: "every five minutes".into(),
            ..Default::default()
        };
        assert!(RecoveryScheduler::new(risk, &config).is_err());
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let (_store, risk) = setup();
        let shutdown = CancellationToken::new();
        let handle = spawn_recovery_loop(risk, &RecoveryConfig::default(), shutdown.clone()).unwrap();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop exits")
            .unwrap();
    }
}
