//! Executor Registry — selects a strategy by task type.

use std::collections::HashMap;
use std::sync::Arc;

use tgfleet_core::error::{FleetError, Result};
use tgfleet_core::traits::{ExecutorFactory, TaskExecutor};
use tgfleet_core::types::{Task, TaskType};

/// Map of task type → strategy factory.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    factories: HashMap<TaskType, Arc<dyn ExecutorFactory>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for a task type.
    pub fn register(&mut self, task_type: TaskType, factory: Arc<dyn ExecutorFactory>) {
        if self.factories.insert(task_type, factory).is_some() {
            tracing::debug!("🔁 Executor for '{task_type}' replaced");
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, task_type: TaskType, factory: impl ExecutorFactory + 'static) -> Self {
        self.register(task_type, Arc::new(factory));
        self
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.factories.contains_key(&task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.factories.contains_key(t))
            .collect()
    }

    /// Build the strategy for a task.
    pub fn resolve(&self, task: &Task) -> Result<Arc<dyn TaskExecutor>> {
        let factory = self.factories.get(&task.task_type).ok_or_else(|| {
            FleetError::executor(format!("no executor registered for '{}'", task.task_type))
        })?;
        let executor = factory.create(task)?;
        if executor.task_type() != task.task_type {
            return Err(FleetError::executor(format!(
                "executor for '{}' reports type '{}'",
                task.task_type,
                executor.task_type()
            )));
        }
        Ok(executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tgfleet_core::traits::{ConnectionHandle, ExecutionOutput};
    use tokio_util::sync::CancellationToken;

    struct Noop(TaskType);

    #[async_trait]
    impl TaskExecutor for Noop {
        fn task_type(&self) -> TaskType {
            self.0
        }

        async fn execute(
            &self,
            _cancel: &CancellationToken,
            _conn: &dyn ConnectionHandle,
        ) -> Result<ExecutionOutput> {
            Ok(ExecutionOutput::new())
        }
    }

    fn noop(reported: TaskType) -> impl ExecutorFactory {
        move |_: &Task| -> Result<Arc<dyn TaskExecutor>> { Ok(Arc::new(Noop(reported))) }
    }

    #[test]
    fn test_resolve_registered_type() {
        let registry = ExecutorRegistry::new().with(TaskType::Check, noop(TaskType::Check));
        let task = Task::new(1, TaskType::Check, vec![1]);
        assert_eq!(registry.resolve(&task).unwrap().task_type(), TaskType::Check);
        assert_eq!(registry.registered_types(), vec![TaskType::Check]);
    }

    #[test]
    fn test_unknown_type_is_executor_error() {
        let registry = ExecutorRegistry::new();
        let task = Task::new(1, TaskType::Broadcast, vec![1]);
        assert!(matches!(registry.resolve(&task), Err(FleetError::Executor(_))));
    }

    #[test]
    fn test_factory_error_propagates() {
        let registry = ExecutorRegistry::new().with(
            TaskType::JoinGroup,
            |_: &Task| -> Result<Arc<dyn TaskExecutor>> {
                Err(FleetError::validation("missing 'group' in task config"))
            },
        );
        let task = Task::new(1, TaskType::JoinGroup, vec![1]);
        assert!(matches!(registry.resolve(&task), Err(FleetError::Validation(_))));
    }

    #[test]
    fn test_mismatched_executor_type_rejected() {
        let registry = ExecutorRegistry::new().with(TaskType::Check, noop(TaskType::Scenario));
        let task = Task::new(1, TaskType::Check, vec![1]);
        assert!(registry.resolve(&task).is_err());
    }
}
