//! Task Runner — executes one task against each target account, in order.
//!
//! Per account: cancellation check → account lookup (terminal ⇒ skipped)
//! → risk admission → executor resolution → pool execution → outcome report.
//! One account's failure never aborts the fan-out.

use std::time::Instant;

use chrono::Utc;
use tgfleet_core::traits::TaskUpdate;
use tgfleet_core::types::{
    AccountId, AccountOutcome, AccountResult, LogLevel, Task, TaskLogEntry, TaskStatus,
};
use tgfleet_risk::Admission;
use tokio_util::sync::CancellationToken;

use crate::aggregate::RunSummary;
use crate::engine::SchedulerDeps;

/// How a fan-out ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every target was visited.
    Finished(RunSummary),
    /// Cancellation was observed at an account boundary.
    Cancelled(RunSummary),
}

impl RunOutcome {
    /// Treat the run as cancelled when a stop arrived after the last
    /// boundary check, e.g. while the final account was executing.
    pub fn cancelled_if(self, cancelled: bool) -> Self {
        match self {
            RunOutcome::Finished(summary) if cancelled => RunOutcome::Cancelled(summary),
            outcome => outcome,
        }
    }
}

/// Fan a task out across its targets, sequentially.
pub async fn run_accounts(
    deps: &SchedulerDeps,
    task: &Task,
    cancel: &CancellationToken,
) -> RunOutcome {
    let mut summary = RunSummary::new();

    for &account_id in &task.account_targets {
        if cancel.is_cancelled() {
            tracing::info!(
                task_id = task.id,
                "🛑 Task cancelled after {}/{} accounts",
                summary.attempted(),
                task.account_targets.len()
            );
            return RunOutcome::Cancelled(summary);
        }

        let result = run_account(deps, task, account_id, cancel).await;
        log_outcome(deps, task, account_id, &result).await;
        summary.record(account_id, result);
    }

    RunOutcome::Finished(summary)
}

async fn run_account(
    deps: &SchedulerDeps,
    task: &Task,
    account_id: AccountId,
    cancel: &CancellationToken,
) -> AccountResult {
    let started = Instant::now();
    let elapsed_ms = || started.elapsed().as_millis() as u64;

    let account = match deps.accounts.get_account(account_id).await {
        Ok(Some(account)) => account,
        Ok(None) => return AccountResult::failed("account not found", elapsed_ms()),
        Err(e) => return AccountResult::failed(format!("account lookup: {e}"), elapsed_ms()),
    };
    if account.status.is_terminal() {
        return AccountResult::skipped(format!("account is {}", account.status));
    }

    match deps.risk.can_execute_task(account_id, task.task_type).await {
        Ok(Admission::Denied(reason)) => return AccountResult::failed(reason, elapsed_ms()),
        Ok(_) => {}
        Err(e) => return AccountResult::failed(format!("risk check: {e}"), elapsed_ms()),
    }

    let executor = match deps.executors.resolve(task) {
        Ok(executor) => executor,
        Err(e) => return AccountResult::failed(e.to_string(), elapsed_ms()),
    };

    let conn_status = deps.pool.connection_status(account_id);
    if !conn_status.is_usable() {
        tracing::warn!(
            task_id = task.id,
            account_id,
            ?conn_status,
            "⚠️ Connection not ready, pool will retry"
        );
    }
    if deps.pool.is_account_busy(account_id) {
        tracing::warn!(task_id = task.id, account_id, "⏳ Account busy, waiting for pool");
    }

    let exec_started = Instant::now();
    let outcome = deps.pool.execute_task(account_id, executor, cancel).await;
    let duration_ms = exec_started.elapsed().as_millis() as u64;

    match outcome {
        Ok(details) => {
            if let Err(e) = deps.risk.report_task_result(account_id, true, None).await {
                tracing::warn!(account_id, "⚠️ Failed to report success: {e}");
            }
            AccountResult::success(duration_ms, details)
        }
        Err(e) => {
            let error = e.to_string();
            if let Err(e) = deps.risk.report_task_result(account_id, false, Some(&error)).await {
                tracing::warn!(account_id, "⚠️ Failed to report failure: {e}");
            }
            if let Err(e) = deps.risk.handle_telegram_error(account_id, &error).await {
                tracing::warn!(account_id, "⚠️ Failed to classify provider error: {e}");
            }
            AccountResult::failed(error, duration_ms)
        }
    }
}

async fn log_outcome(
    deps: &SchedulerDeps,
    task: &Task,
    account_id: AccountId,
    result: &AccountResult,
) {
    let reason = result.error.as_deref().unwrap_or("");
    let (level, message) = match result.status {
        AccountOutcome::Success => (
            LogLevel::Info,
            format!("{} succeeded in {}ms", task.task_type, result.duration_ms),
        ),
        AccountOutcome::Skipped => (LogLevel::Warn, format!("{} skipped: {reason}", task.task_type)),
        AccountOutcome::Failed => (LogLevel::Error, format!("{} failed: {reason}", task.task_type)),
    };
    tracing::debug!(task_id = task.id, account_id, "{message}");

    let entry = TaskLogEntry::new(level, message)
        .for_task(task.id)
        .for_account(account_id);
    if let Err(e) = deps.logs.append(entry).await {
        tracing::warn!(task_id = task.id, "⚠️ Failed to write task log: {e}");
    }
}

/// Persist the outcome of a run.
///
/// A finished run gets its final status from the completion policy. A
/// cancelled run keeps `cancelled` and only its partial results are written;
/// a runner never overwrites a stop with `completed` or `failed`.
pub async fn finalize(deps: &SchedulerDeps, task: &mut Task, outcome: RunOutcome) {
    let total = task.account_targets.len();
    let (summary, update) = match outcome {
        RunOutcome::Finished(summary) => {
            let status = summary.final_status();
            let error = (status == TaskStatus::Failed).then(|| summary.failure_reason());
            summary.write_into(&mut task.result, total);
            task.status = status;
            task.completed_at = Some(Utc::now());
            task.error = error.clone();
            let update = TaskUpdate {
                status: Some(status),
                completed_at: task.completed_at,
                result: Some(task.result.clone()),
                error,
                ..Default::default()
            };
            (summary, update)
        }
        RunOutcome::Cancelled(summary) => {
            summary.write_into(&mut task.result, total);
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            // Re-asserted so a late `running` write cannot mask the stop.
            let update = TaskUpdate {
                status: Some(TaskStatus::Cancelled),
                completed_at: task.completed_at,
                result: Some(task.result.clone()),
                ..Default::default()
            };
            (summary, update)
        }
    };

    if let Err(e) = deps.tasks.update_fields(task.id, update).await {
        tracing::error!(task_id = task.id, "❌ Failed to persist task result: {e}");
    }

    let message = format!(
        "Task {}: {}/{} succeeded, {} failed, {} skipped",
        task.status,
        summary.success_count(),
        total,
        summary.fail_count(),
        summary.skipped_count()
    );
    match task.status {
        TaskStatus::Failed => tracing::warn!(task_id = task.id, "❌ {message}"),
        TaskStatus::Cancelled => tracing::info!(task_id = task.id, "🛑 {message}"),
        _ => tracing::info!(task_id = task.id, "✅ {message}"),
    }
    let level = if task.status == TaskStatus::Failed {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    if let Err(e) = deps
        .logs
        .append(TaskLogEntry::new(level, message).for_task(task.id))
        .await
    {
        tracing::warn!(task_id = task.id, "⚠️ Failed to write task log: {e}");
    }
}
