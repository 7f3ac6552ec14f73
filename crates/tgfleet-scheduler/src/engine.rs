//! Scheduler Engine — global queue + timer-driven dispatch under a concurrency ceiling.
//!
//! Every tick the dispatch loop admits at most one queued task, and only while
//! fewer than `max_concurrent` tasks are running. Each admitted task gets a
//! child cancellation token and its own runner; a panicking runner is caught
//! and recorded as a failed task.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::FutureExt;
use tgfleet_core::config::SchedulerConfig;
use tgfleet_core::error::{FleetError, Result};
use tgfleet_core::traits::{
    AccountRepository, ConnectionPool, TaskLogSink, TaskRepository, TaskUpdate,
};
use tgfleet_core::types::{Task, TaskId, TaskStatus};
use tgfleet_risk::RiskControl;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cancel::{CancellationRegistry, RegistrySlot};
use crate::executors::ExecutorRegistry;
use crate::queue::TaskQueue;
use crate::runner;

/// Collaborators the scheduler drives.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub tasks: Arc<dyn TaskRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub logs: Arc<dyn TaskLogSink>,
    pub pool: Arc<dyn ConnectionPool>,
    pub risk: Arc<RiskControl>,
    pub executors: Arc<ExecutorRegistry>,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Was queued; removed and will never run.
    RemovedFromQueue,
    /// Was running; the runner stops at its next account boundary.
    CancelSignalled,
    /// Neither queued nor running, or already persisting its final status.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub max_concurrent: usize,
    pub total_dispatched: u64,
    pub total_finished: u64,
}

struct Shared {
    deps: SchedulerDeps,
    config: SchedulerConfig,
    queue: TaskQueue,
    registry: Arc<CancellationRegistry>,
    /// IDs between validation and enqueue in `submit`.
    submitting: Mutex<HashSet<TaskId>>,
    root: CancellationToken,
    total_dispatched: AtomicU64,
    total_finished: AtomicU64,
}

/// The task scheduler.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    dispatch_loop: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(deps: SchedulerDeps, config: SchedulerConfig) -> Self {
        let mut config = config;
        config.normalize();
        Self {
            shared: Arc::new(Shared {
                deps,
                config,
                queue: TaskQueue::new(),
                registry: Arc::new(CancellationRegistry::new()),
                submitting: Mutex::new(HashSet::new()),
                root: CancellationToken::new(),
                total_dispatched: AtomicU64::new(0),
                total_finished: AtomicU64::new(0),
            }),
            dispatch_loop: Mutex::new(None),
        }
    }

    /// Spawn the dispatch loop. Calling it again is a no-op.
    pub fn start(&self) {
        let mut slot = self.dispatch_loop.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            tracing::debug!("Scheduler already started");
            return;
        }
        if self.shared.root.is_cancelled() {
            tracing::warn!("⚠️ Scheduler was shut down, not restarting");
            return;
        }
        tracing::info!(
            max_concurrent = self.shared.config.max_concurrent,
            "⏰ Scheduler started (tick every {}ms)",
            self.shared.config.tick_interval_ms
        );
        *slot = Some(tokio::spawn(dispatch_loop(self.shared.clone())));
    }

    /// Validate, persist `queued` and append to the queue.
    pub async fn submit(&self, mut task: Task) -> Result<()> {
        if task.account_targets.is_empty() {
            return Err(FleetError::validation(format!(
                "task {} has no account targets",
                task.id
            )));
        }
        let mut seen = HashSet::with_capacity(task.account_targets.len());
        if let Some(dup) = task.account_targets.iter().find(|id| !seen.insert(**id)) {
            return Err(FleetError::validation(format!(
                "task {}: account {dup} is targeted more than once",
                task.id
            )));
        }
        if !self.shared.deps.executors.contains(task.task_type) {
            return Err(FleetError::validation(format!(
                "task {}: unknown task type '{}'",
                task.id, task.task_type
            )));
        }
        if self.shared.root.is_cancelled() {
            return Err(FleetError::Denied("scheduler is shut down".into()));
        }
        let Some(_reservation) = self.shared.reserve(task.id) else {
            return Err(FleetError::validation(format!(
                "task {} is already queued or running",
                task.id
            )));
        };

        self.shared
            .deps
            .tasks
            .update_task_status(task.id, TaskStatus::Queued)
            .await?;
        task.status = TaskStatus::Queued;

        let id = task.id;
        let registry = &self.shared.registry;
        if !self.shared.queue.push_unique(task, |id| registry.contains(id)) {
            return Err(FleetError::validation(format!(
                "task {id} is already queued or running"
            )));
        }
        tracing::info!(task_id = id, "📥 Task submitted");
        Ok(())
    }

    /// Stop a queued or running task. Both paths persist `cancelled`.
    pub async fn stop_task(&self, id: TaskId) -> StopOutcome {
        let outcome = if self.shared.queue.remove(id).is_some() {
            StopOutcome::RemovedFromQueue
        } else if self.shared.registry.cancel(id) {
            StopOutcome::CancelSignalled
        } else {
            return StopOutcome::NotFound;
        };

        let update = TaskUpdate {
            status: Some(TaskStatus::Cancelled),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(e) = self.shared.deps.tasks.update_fields(id, update).await {
            tracing::warn!(task_id = id, "⚠️ Failed to persist cancellation: {e}");
        }
        tracing::info!(task_id = id, ?outcome, "🛑 Stop requested");
        outcome
    }

    /// Stop admitting work and wait (bounded) for running tasks to drain.
    /// Returns true when nothing is left running.
    pub async fn shutdown(&self) -> bool {
        self.shared.root.cancel();
        let deadline = Instant::now() + self.shared.config.shutdown_timeout();
        let poll = self.shared.config.drain_poll_interval();

        while !self.shared.registry.is_empty() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    running = self.shared.registry.len(),
                    "⚠️ Shutdown timed out with tasks still running"
                );
                return false;
            }
            tokio::time::sleep(poll).await;
        }

        let left = self.shared.queue.len();
        if left > 0 {
            tracing::info!("🛑 Scheduler stopped, {left} task(s) left queued");
        } else {
            tracing::info!("🛑 Scheduler stopped");
        }
        true
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.shared.queue.len(),
            running: self.shared.registry.len(),
            max_concurrent: self.shared.config.max_concurrent,
            total_dispatched: self.shared.total_dispatched.load(Ordering::Relaxed),
            total_finished: self.shared.total_finished.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self, id: TaskId) -> bool {
        self.shared.registry.contains(id)
    }

    pub fn queued_ids(&self) -> Vec<TaskId> {
        self.shared.queue.ids()
    }

    pub fn running_ids(&self) -> Vec<TaskId> {
        self.shared.registry.running_ids()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shared.root.cancel();
    }
}

async fn dispatch_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.config.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.root.cancelled() => break,
            _ = interval.tick() => {
                if let Some((task, cancel)) = shared.admit_next() {
                    tokio::spawn(shared.clone().run(task, cancel));
                }
            }
        }
    }
    tracing::debug!("Dispatch loop exited");
}

/// Holds a task ID in `Shared::submitting` until dropped.
struct Reservation<'a> {
    shared: &'a Shared,
    id: TaskId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.shared
            .submitting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

impl Shared {
    /// Claim a task ID for submission. None when it is already being
    /// submitted, queued or running.
    fn reserve(&self, id: TaskId) -> Option<Reservation<'_>> {
        let mut submitting = self.submitting.lock().unwrap_or_else(|e| e.into_inner());
        if submitting.contains(&id) || self.queue.contains(id) || self.registry.contains(id) {
            return None;
        }
        submitting.insert(id);
        Some(Reservation { shared: self, id })
    }

    /// Pop the head of the queue if a concurrency slot is free, registering
    /// it as running before the queue lock is released.
    fn admit_next(&self) -> Option<(Task, CancellationToken)> {
        let mut token = None;
        let task = self.queue.pop_front_with(|task| {
            if self.registry.len() >= self.config.max_concurrent {
                return false;
            }
            let child = self.root.child_token();
            self.registry.insert(task.id, child.clone());
            token = Some(child);
            true
        })?;
        self.total_dispatched.fetch_add(1, Ordering::Relaxed);
        Some((task, token?))
    }

    async fn run(self: Arc<Self>, mut task: Task, cancel: CancellationToken) {
        let _slot = RegistrySlot::new(self.registry.clone(), task.id);

        let started_at = Utc::now();
        task.status = TaskStatus::Running;
        task.started_at = Some(started_at);
        let update = TaskUpdate {
            status: Some(TaskStatus::Running),
            started_at: Some(started_at),
            ..Default::default()
        };
        if let Err(e) = self.deps.tasks.update_fields(task.id, update).await {
            tracing::warn!(task_id = task.id, "⚠️ Failed to persist running status: {e}");
        }
        tracing::info!(
            task_id = task.id,
            task_type = %task.task_type,
            accounts = task.account_targets.len(),
            "🚀 Task dispatched"
        );

        let outcome = AssertUnwindSafe(runner::run_accounts(&self.deps, &task, &cancel))
            .catch_unwind()
            .await;

        // From here on stop requests see the task as finishing.
        let cancelled = self.registry.close(task.id);
        match outcome {
            Ok(outcome) => {
                runner::finalize(&self.deps, &mut task, outcome.cancelled_if(cancelled)).await
            }
            Err(panic) => {
                self.record_panic(&task, cancelled, panic_message(panic.as_ref()))
                    .await
            }
        }
        self.total_finished.fetch_add(1, Ordering::Relaxed);
    }

    async fn record_panic(&self, task: &Task, cancelled: bool, message: String) {
        tracing::error!(task_id = task.id, "💥 Task runner panicked: {message}");
        let status = if cancelled {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        let update = TaskUpdate {
            status: Some(status),
            completed_at: Some(Utc::now()),
            error: Some(format!("runner panicked: {message}")),
            ..Default::default()
        };
        if let Err(e) = self.deps.tasks.update_fields(task.id, update).await {
            tracing::error!(task_id = task.id, "❌ Failed to persist runner panic: {e}");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
