//! Cancellation Registry — task ID → cancel token for in-flight tasks.
//!
//! Presence in the registry is what "running" means. A runner closes its
//! entry before persisting a terminal status; a closed entry no longer
//! accepts stop requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tgfleet_core::types::TaskId;
use tokio_util::sync::CancellationToken;

struct Entry {
    token: CancellationToken,
    closed: bool,
}

#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<TaskId, Entry>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking runner must not wedge dispatch; recover the map.
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Entry>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, id: TaskId, token: CancellationToken) {
        self.lock().insert(id, Entry { token, closed: false });
    }

    /// Signal cancellation. Returns false when the task is not running or
    /// its runner has already closed the entry.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.lock().get(&id) {
            Some(entry) if !entry.closed => {
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Refuse further stop requests for a task and report whether it was
    /// cancelled before that point.
    pub fn close(&self, id: TaskId) -> bool {
        match self.lock().get_mut(&id) {
            Some(entry) => {
                entry.closed = true;
                entry.token.is_cancelled()
            }
            None => false,
        }
    }

    pub fn remove(&self, id: TaskId) -> Option<CancellationToken> {
        self.lock().remove(&id).map(|entry| entry.token)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn running_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Releases a task's registry slot when dropped, including on unwind.
pub struct RegistrySlot {
    registry: Arc<CancellationRegistry>,
    task_id: TaskId,
}

impl RegistrySlot {
    pub fn new(registry: Arc<CancellationRegistry>, task_id: TaskId) -> Self {
        Self { registry, task_id }
    }
}

impl Drop for RegistrySlot {
    fn drop(&mut self) {
        self.registry.remove(self.task_id);
    }
}
