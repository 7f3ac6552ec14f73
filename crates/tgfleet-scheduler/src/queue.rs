//! Task Queue — a single global FIFO of submitted tasks.
//!
//! Ordering is pure arrival order; `Task::priority` is carried but not used.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tgfleet_core::types::{Task, TaskId};

#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append unless a task with the same ID is queued or `is_running` says
    /// it is in flight. Returns false on duplicate.
    pub fn push_unique(&self, task: Task, is_running: impl FnOnce(TaskId) -> bool) -> bool {
        let mut queue = self.lock();
        if queue.iter().any(|t| t.id == task.id) || is_running(task.id) {
            return false;
        }
        tracing::debug!(task_id = task.id, "📥 Queued (depth: {})", queue.len() + 1);
        queue.push_back(task);
        true
    }

    /// Pop the head if `admit` accepts it. `admit` runs under the queue lock,
    /// so a task is never observable as neither queued nor running.
    pub fn pop_front_with(&self, admit: impl FnOnce(&Task) -> bool) -> Option<Task> {
        let mut queue = self.lock();
        let head = queue.front()?;
        if !admit(head) {
            return None;
        }
        queue.pop_front()
    }

    /// Remove a queued task in place.
    pub fn remove(&self, id: TaskId) -> Option<Task> {
        let mut queue = self.lock();
        let pos = queue.iter().position(|t| t.id == id)?;
        queue.remove(pos)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.lock().iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queued IDs, head first.
    pub fn ids(&self) -> Vec<TaskId> {
        self.lock().iter().map(|t| t.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgfleet_core::types::TaskType;

    fn task(id: TaskId) -> Task {
        Task::new(id, TaskType::Check, vec![1])
    }

    #[test]
    fn test_fifo_order_ignores_priority() {
        let queue = TaskQueue::new();
        queue.push_unique(task(1).with_priority(0), |_| false);
        queue.push_unique(task(2).with_priority(99), |_| false);
        queue.push_unique(task(3), |_| false);

        assert_eq!(queue.ids(), vec![1, 2, 3]);
        assert_eq!(queue.pop_front_with(|_| true).unwrap().id, 1);
        assert_eq!(queue.pop_front_with(|_| true).unwrap().id, 2);
    }

    #[test]
    fn test_rejects_duplicates() {
        let queue = TaskQueue::new();
        assert!(queue.push_unique(task(1), |_| false));
        assert!(!queue.push_unique(task(1), |_| false));
        assert!(!queue.push_unique(task(2), |id| id == 2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_refused_admission_keeps_head() {
        let queue = TaskQueue::new();
        queue.push_unique(task(7), |_| false);
        assert!(queue.pop_front_with(|_| false).is_none());
        assert!(queue.contains(7));
    }

    #[test]
    fn test_remove_from_middle() {
        let queue = TaskQueue::new();
        for id in 1..=3 {
            queue.push_unique(task(id), |_| false);
        }
        assert_eq!(queue.remove(2).map(|t| t.id), Some(2));
        assert!(queue.remove(2).is_none());
        assert_eq!(queue.ids(), vec![1, 3]);
    }
}
