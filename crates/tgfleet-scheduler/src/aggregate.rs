//! Result aggregation — folds per-account outcomes into a task verdict.
//!
//! Completion policy: any success ⇒ `completed` (even with failures);
//! zero successes ⇒ `failed` with the last observed error.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tgfleet_core::types::{AccountId, AccountOutcome, AccountResult, TaskStatus};

/// Per-account outcomes of one task run, keyed by account.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    results: BTreeMap<AccountId, AccountResult>,
    last_error: Option<String>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, account_id: AccountId, result: AccountResult) {
        if result.status == AccountOutcome::Failed {
            self.last_error = result.error.clone();
        }
        self.results.insert(account_id, result);
    }

    pub fn get(&self, account_id: AccountId) -> Option<&AccountResult> {
        self.results.get(&account_id)
    }

    fn count(&self, outcome: AccountOutcome) -> usize {
        self.results.values().filter(|r| r.status == outcome).count()
    }

    pub fn success_count(&self) -> usize {
        self.count(AccountOutcome::Success)
    }

    pub fn fail_count(&self) -> usize {
        self.count(AccountOutcome::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(AccountOutcome::Skipped)
    }

    /// Accounts that have an entry.
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn final_status(&self) -> TaskStatus {
        if self.success_count() == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        }
    }

    /// Error to surface on a failed task.
    pub fn failure_reason(&self) -> String {
        match &self.last_error {
            Some(e) if self.fail_count() > 0 => e.clone(),
            _ => format!("no account succeeded ({} skipped)", self.skipped_count()),
        }
    }

    /// Write the reserved result fields into a task's result payload,
    /// preserving any other keys already present.
    pub fn write_into(&self, result: &mut Map<String, Value>, total_accounts: usize) {
        let per_account: Map<String, Value> = self
            .results
            .iter()
            .map(|(id, r)| {
                let value = serde_json::to_value(r).unwrap_or_else(|e| {
                    json!({ "status": "failed", "error": format!("unserializable result: {e}") })
                });
                (id.to_string(), value)
            })
            .collect();

        result.insert("per_account_results".into(), Value::Object(per_account));
        result.insert("success_count".into(), json!(self.success_count()));
        result.insert("fail_count".into(), json!(self.fail_count()));
        result.insert("skipped_count".into(), json!(self.skipped_count()));
        result.insert("total_accounts".into(), json!(total_accounts));
    }
}
