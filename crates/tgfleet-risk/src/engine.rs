//! Risk Control Engine — per-account admission gate and state machine.
//!
//! ```text
//!           failures ≥ max            cooling_until elapsed + sweep
//!  normal ─────────────────→ cooling ─────────────────────────────→ normal
//!    │   FLOOD_WAIT / PEER_FLOOD ↗
//!    ├── AUTH_KEY_UNREGISTERED / BANNED → dead   (terminal)
//!    └── CHAT_WRITE_FORBIDDEN           → restricted
//!  warning ── older than 24h + sweep ──→ normal
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tgfleet_core::config::RiskConfig;
use tgfleet_core::error::{FleetError, Result};
use tgfleet_core::traits::{AccountRepository, RiskSettingsRepository, TaskLogSink};
use tgfleet_core::types::{
    Account, AccountId, AccountStatus, LogLevel, RiskSettings, TaskLogEntry, TaskType, UserId,
};

use crate::classify::{RiskVerdict, classify_provider_error};

/// Result of the admission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Allowed, but the account is already under a provider restriction.
    AllowedWithWarning(String),
    Denied(String),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Denied(_))
    }
}

/// Pure gate over an account snapshot.
pub fn admit(account: &Account, task_type: TaskType, now: DateTime<Utc>) -> Admission {
    match account.status {
        AccountStatus::Dead => Admission::Denied("account is dead".into()),
        AccountStatus::Frozen => Admission::Denied("account is frozen".into()),
        AccountStatus::Maintenance => Admission::Denied("account is under maintenance".into()),
        AccountStatus::Cooling => match account.cooling_until {
            Some(until) if until > now => Admission::Denied(format!(
                "account is cooling, {} remaining",
                format_remaining(until - now)
            )),
            // Expired cooldown: the recovery sweep corrects the stored status.
            _ => Admission::Allowed,
        },
        AccountStatus::Restricted | AccountStatus::TwoWay => Admission::AllowedWithWarning(
            format!("account is {} while running {}", account.status, task_type),
        ),
        AccountStatus::New | AccountStatus::Normal | AccountStatus::Warning => Admission::Allowed,
    }
}

fn format_remaining(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Risk control over the account fleet.
pub struct RiskControl {
    accounts: Arc<dyn AccountRepository>,
    settings: Arc<dyn RiskSettingsRepository>,
    logs: Arc<dyn TaskLogSink>,
    config: RiskConfig,
}

impl RiskControl {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        settings: Arc<dyn RiskSettingsRepository>,
        logs: Arc<dyn TaskLogSink>,
        config: RiskConfig,
    ) -> Self {
        Self {
            accounts,
            settings,
            logs,
            config,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Effective settings for a user: stored values, else configured defaults.
    pub async fn settings_for(&self, user_id: UserId) -> Result<RiskSettings> {
        Ok(match self.settings.get_settings(user_id).await? {
            Some(settings) => settings.validated(),
            None => self.config.default_settings(),
        })
    }

    /// Admission check immediately before executing `task_type` on an account.
    pub async fn can_execute_task(
        &self,
        account_id: AccountId,
        task_type: TaskType,
    ) -> Result<Admission> {
        let account = self.require_account(account_id).await?;
        let admission = admit(&account, task_type, Utc::now());
        match &admission {
            Admission::Denied(reason) => {
                tracing::debug!(account_id, %task_type, "🚫 Admission denied: {reason}");
            }
            Admission::AllowedWithWarning(reason) => {
                tracing::warn!(account_id, %task_type, "⚠️ Risk warning: {reason}");
                self.log(LogLevel::Warn, account_id, format!("Risk warning: {reason}"))
                    .await;
            }
            Admission::Allowed => {}
        }
        Ok(admission)
    }

    /// Feed an execution outcome into the consecutive-failure counter.
    pub async fn report_task_result(
        &self,
        account_id: AccountId,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        if success {
            let account = self.require_account(account_id).await?;
            if account.consecutive_failures > 0 {
                self.accounts.reset_failures(account_id).await?;
                tracing::debug!(
                    account_id,
                    prev_failures = account.consecutive_failures,
                    "✅ Failure counter reset"
                );
            }
            return Ok(());
        }

        let count = self.accounts.increment_failures(account_id).await?;
        let account = self.require_account(account_id).await?;
        let settings = self.settings_for(account.user_id).await?;
        tracing::debug!(
            account_id,
            failures = count,
            max = settings.max_consecutive_failures,
            error = error.unwrap_or(""),
            "❌ Task failure recorded"
        );

        if count >= settings.max_consecutive_failures && !account.status.is_terminal() {
            let until = Utc::now() + settings.cooling_duration();
            self.accounts
                .update_account_status(account_id, AccountStatus::Cooling, Some(until))
                .await?;
            let msg = format!(
                "{count} consecutive failures, cooling for {}m",
                settings.cooling_duration_minutes
            );
            tracing::warn!(account_id, "🧊 {msg}");
            self.log(LogLevel::Warn, account_id, msg).await;
        }
        Ok(())
    }

    /// Apply a provider error to the account state machine.
    /// Returns the verdict that was applied (`Unclassified` when nothing changed).
    pub async fn handle_telegram_error(
        &self,
        account_id: AccountId,
        error: &str,
    ) -> Result<RiskVerdict> {
        let verdict = classify_provider_error(error, &self.config);
        if verdict == RiskVerdict::Unclassified {
            return Ok(verdict);
        }

        let account = self.require_account(account_id).await?;
        if account.status.is_terminal() {
            return Ok(RiskVerdict::Unclassified);
        }

        let (status, until, msg) = match &verdict {
            RiskVerdict::Dead { reason } => {
                (AccountStatus::Dead, None, format!("Account dead: {reason}"))
            }
            RiskVerdict::Cooling { duration, reason } => {
                let until = Utc::now() + *duration;
                (
                    AccountStatus::Cooling,
                    Some(until),
                    format!("{reason}, cooling until {}", until.format("%Y-%m-%d %H:%M:%S UTC")),
                )
            }
            RiskVerdict::Restricted { reason } => (
                AccountStatus::Restricted,
                None,
                format!("Account restricted: {reason}"),
            ),
            RiskVerdict::Unclassified => return Ok(RiskVerdict::Unclassified),
        };

        self.accounts
            .update_account_status(account_id, status, until)
            .await?;
        let level = if status == AccountStatus::Dead {
            tracing::error!(account_id, "💀 {msg}");
            LogLevel::Error
        } else {
            tracing::warn!(account_id, "⚠️ {msg}");
            LogLevel::Warn
        };
        self.log(level, account_id, msg).await;
        Ok(verdict)
    }

    /// Return every account whose cooldown has elapsed to `normal`.
    pub async fn process_cooling_recovery(&self) -> Result<usize> {
        let now = Utc::now();
        let expired = self.accounts.find_expired_cooling(now).await?;
        let mut recovered = 0;
        for account in expired {
            if let Err(e) = self.recover(&account, "cooldown expired").await {
                tracing::warn!(account_id = account.id, "⚠️ Cooling recovery failed: {e}");
                continue;
            }
            recovered += 1;
        }
        if recovered > 0 {
            tracing::info!("🔓 Cooling recovery: {recovered} account(s) back to normal");
        }
        Ok(recovered)
    }

    /// Return `warning` accounts older than the configured age to `normal`.
    pub async fn process_warning_recovery(&self) -> Result<usize> {
        let older_than = Utc::now() - Duration::hours(self.config.warning_recovery_hours);
        let stale = self.accounts.find_stale_warnings(older_than).await?;
        let mut recovered = 0;
        for account in stale {
            if let Err(e) = self.recover(&account, "warning aged out").await {
                tracing::warn!(account_id = account.id, "⚠️ Warning recovery failed: {e}");
                continue;
            }
            recovered += 1;
        }
        if recovered > 0 {
            tracing::info!("🔓 Warning recovery: {recovered} account(s) back to normal");
        }
        Ok(recovered)
    }

    async fn recover(&self, account: &Account, why: &str) -> Result<()> {
        self.accounts
            .update_account_status(account.id, AccountStatus::Normal, None)
            .await?;
        self.accounts.reset_failures(account.id).await?;
        self.log(
            LogLevel::Info,
            account.id,
            format!("Recovered {} → normal ({why})", account.status),
        )
        .await;
        Ok(())
    }

    async fn require_account(&self, account_id: AccountId) -> Result<Account> {
        self.accounts
            .get_account(account_id)
            .await?
            .ok_or_else(|| FleetError::NotFound(format!("account {account_id}")))
    }

    async fn log(&self, level: LogLevel, account_id: AccountId, message: String) {
        let entry = TaskLogEntry::new(level, message).for_account(account_id);
        if let Err(e) = self.logs.append(entry).await {
            tracing::warn!(account_id, "⚠️ Failed to write risk log: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgfleet_store::MemoryStore;

    fn setup(accounts: Vec<Account>) -> (Arc<MemoryStore>, RiskControl) {
        let store = Arc::new(MemoryStore::new());
        for acc in accounts {
            store.insert_account(acc).unwrap();
        }
        let risk = RiskControl::new(
            store.clone(),
            store.clone(),
            store.clone(),
            RiskConfig::default(),
        );
        (store, risk)
    }

    fn account(id: AccountId, status: AccountStatus) -> Account {
        Account::new(id, 100, &format!("+1555000{id}")).with_status(status)
    }

    fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>) {
        let diff = (actual - expected).num_seconds().abs();
        assert!(diff <= 2, "expected ~{expected}, got {actual}");
    }

    #[test]
    fn test_admission_table() {
        let now = Utc::now();
        let t = TaskType::PrivateMessage;
        assert!(!admit(&account(1, AccountStatus::Dead), t, now).is_allowed());
        assert!(!admit(&account(1, AccountStatus::Frozen), t, now).is_allowed());
        assert!(!admit(&account(1, AccountStatus::Maintenance), t, now).is_allowed());
        assert_eq!(admit(&account(1, AccountStatus::New), t, now), Admission::Allowed);
        assert_eq!(admit(&account(1, AccountStatus::Normal), t, now), Admission::Allowed);
        assert_eq!(admit(&account(1, AccountStatus::Warning), t, now), Admission::Allowed);
        assert!(matches!(
            admit(&account(1, AccountStatus::Restricted), t, now),
            Admission::AllowedWithWarning(_)
        ));
        assert!(matches!(
            admit(&account(1, AccountStatus::TwoWay), t, now),
            Admission::AllowedWithWarning(_)
        ));
    }

    #[test]
    fn test_cooling_admission_depends_on_expiry() {
        let now = Utc::now();
        let mut acc = account(1, AccountStatus::Cooling);
        acc.cooling_until = Some(now + Duration::minutes(10));
        match admit(&acc, TaskType::Check, now) {
            Admission::Denied(reason) => assert!(reason.contains("10m0s"), "{reason}"),
            other => panic!("{other:?}"),
        }

        acc.cooling_until = Some(now - Duration::seconds(1));
        assert_eq!(admit(&acc, TaskType::Check, now), Admission::Allowed);
    }

    #[tokio::test]
    async fn test_threshold_failure_enters_cooling() {
        let mut acc = account(1, AccountStatus::Normal);
        acc.consecutive_failures = RiskSettings::DEFAULT_MAX_CONSECUTIVE_FAILURES - 1;
        let (store, risk) = setup(vec![acc]);

        risk.report_task_result(1, false, Some("timeout")).await.unwrap();

        let acc = store.account(1).unwrap();
        assert_eq!(acc.status, AccountStatus::Cooling);
        let expected = Utc::now()
            + Duration::minutes(i64::from(RiskSettings::DEFAULT_COOLING_DURATION_MINUTES));
        assert_close(acc.cooling_until.unwrap(), expected);
        assert!(!store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_per_user_settings_override_defaults() {
        let (store, risk) = setup(vec![account(1, AccountStatus::Normal)]);
        store
            .save_settings(
                100,
                RiskSettings {
                    max_consecutive_failures: 1,
                    cooling_duration_minutes: 60,
                },
            )
            .await
            .unwrap();

        risk.report_task_result(1, false, None).await.unwrap();

        let acc = store.account(1).unwrap();
        assert_eq!(acc.status, AccountStatus::Cooling);
        assert_close(acc.cooling_until.unwrap(), Utc::now() + Duration::minutes(60));
    }

    #[tokio::test]
    async fn test_below_threshold_stays_normal() {
        let (store, risk) = setup(vec![account(1, AccountStatus::Normal)]);
        risk.report_task_result(1, false, None).await.unwrap();
        let acc = store.account(1).unwrap();
        assert_eq!(acc.status, AccountStatus::Normal);
        assert_eq!(acc.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let (store, risk) = setup(vec![account(1, AccountStatus::Normal)]);
        risk.report_task_result(1, false, None).await.unwrap();
        risk.report_task_result(1, false, None).await.unwrap();
        assert_eq!(store.account(1).unwrap().consecutive_failures, 2);

        risk.report_task_result(1, true, None).await.unwrap();
        assert_eq!(store.account(1).unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_flood_wait_sets_cooling_with_buffer() {
        let (store, risk) = setup(vec![account(1, AccountStatus::Normal)]);
        let verdict = risk.handle_telegram_error(1, "FLOOD_WAIT_30").await.unwrap();
        assert!(matches!(verdict, RiskVerdict::Cooling { .. }));

        let acc = store.account(1).unwrap();
        assert_eq!(acc.status, AccountStatus::Cooling);
        assert_close(acc.cooling_until.unwrap(), Utc::now() + Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_dead_is_terminal_for_classification() {
        let (store, risk) = setup(vec![account(1, AccountStatus::Normal)]);
        risk.handle_telegram_error(1, "AUTH_KEY_UNREGISTERED").await.unwrap();
        assert_eq!(store.account(1).unwrap().status, AccountStatus::Dead);

        let verdict = risk.handle_telegram_error(1, "FLOOD_WAIT_10").await.unwrap();
        assert_eq!(verdict, RiskVerdict::Unclassified);
        assert_eq!(store.account(1).unwrap().status, AccountStatus::Dead);
    }

    #[tokio::test]
    async fn test_unclassified_error_changes_nothing() {
        let (store, risk) = setup(vec![account(1, AccountStatus::Normal)]);
        let verdict = risk.handle_telegram_error(1, "socket closed").await.unwrap();
        assert_eq!(verdict, RiskVerdict::Unclassified);
        assert_eq!(store.account(1).unwrap().status, AccountStatus::Normal);
        assert!(store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_restricted_error() {
        let (store, risk) = setup(vec![account(1, AccountStatus::Normal)]);
        risk.handle_telegram_error(1, "CHAT_WRITE_FORBIDDEN").await.unwrap();
        assert_eq!(store.account(1).unwrap().status, AccountStatus::Restricted);
    }

    #[tokio::test]
    async fn test_cooling_recovery_is_idempotent() {
        let now = Utc::now();
        let mut expired_a = account(1, AccountStatus::Cooling);
        expired_a.cooling_until = Some(now - Duration::minutes(1));
        expired_a.consecutive_failures = 3;
        let mut expired_b = account(2, AccountStatus::Cooling);
        expired_b.cooling_until = Some(now - Duration::hours(2));
        let mut active = account(3, AccountStatus::Cooling);
        active.cooling_until = Some(now + Duration::hours(1));
        let (store, risk) = setup(vec![expired_a, expired_b, active, account(4, AccountStatus::Normal)]);

        assert_eq!(risk.process_cooling_recovery().await.unwrap(), 2);
        assert_eq!(risk.process_cooling_recovery().await.unwrap(), 0);

        let a = store.account(1).unwrap();
        assert_eq!(a.status, AccountStatus::Normal);
        assert!(a.cooling_until.is_none());
        assert_eq!(a.consecutive_failures, 0);
        assert_eq!(store.account(3).unwrap().status, AccountStatus::Cooling);
    }

    #[tokio::test]
    async fn test_warning_recovery_respects_age() {
        let mut old = account(1, AccountStatus::Warning);
        old.updated_at = Utc::now() - Duration::hours(25);
        let fresh = account(2, AccountStatus::Warning);
        let (store, risk) = setup(vec![old, fresh]);

        assert_eq!(risk.process_warning_recovery().await.unwrap(), 1);
        assert_eq!(store.account(1).unwrap().status, AccountStatus::Normal);
        assert_eq!(store.account(2).unwrap().status, AccountStatus::Warning);
    }

    #[tokio::test]
    async fn test_missing_account_is_not_found() {
        let (_store, risk) = setup(vec![]);
        assert!(matches!(
            risk.can_execute_task(9, TaskType::Check).await,
            Err(FleetError::NotFound(_))
        ));
    }
}
