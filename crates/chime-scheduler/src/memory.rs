//! In-process collaborators for the engine's ports.
//!
//! [`InMemoryTaskStore`] stands in for the persistence layer and
//! [`BroadcastNotifier`] for the event bus. The `chime` binary runs on them
//! and the integration tests build on them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace};

use crate::error::PortError;
use crate::ports::{ExecutionPort, NotificationPort, TaskLoadPort};
use crate::types::{ExecutionOutcome, ExecutionStatus, ScheduledTask, TaskStatus, TriggeredEvent};

/// Broadcast channel capacity for triggered events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Task records and execution history held in memory.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, ScheduledTask>>,
    executions: RwLock<Vec<(String, ExecutionOutcome)>>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a store pre-populated with `tasks`.
    pub fn with_tasks(tasks: impl IntoIterator<Item = ScheduledTask>) -> Arc<Self> {
        let tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Arc::new(Self {
            tasks: RwLock::new(tasks),
            executions: RwLock::new(Vec::new()),
        })
    }

    /// Insert or replace a task record.
    pub async fn upsert(&self, task: ScheduledTask) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    /// Get a task record by id.
    pub async fn get(&self, id: &str) -> Option<ScheduledTask> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Mark a task cancelled. Returns false if it does not exist.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.tasks.write().await.get_mut(id) {
            Some(task) => {
                task.status = TaskStatus::Cancelled;
                true
            }
            None => false,
        }
    }

    /// Every recorded execution, oldest first.
    pub async fn executions(&self) -> Vec<(String, ExecutionOutcome)> {
        self.executions.read().await.clone()
    }

    async fn update<F>(&self, id: &str, f: F) -> Result<(), PortError>
    where
        F: FnOnce(&mut ScheduledTask),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| PortError::NotFound(id.to_string()))?;
        f(task);
        Ok(())
    }
}

#[async_trait]
impl TaskLoadPort for InMemoryTaskStore {
    async fn load_pending_tasks(&self) -> Result<Vec<ScheduledTask>, PortError> {
        let tasks: Vec<_> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_schedulable())
            .cloned()
            .collect();
        debug!(count = tasks.len(), "loaded pending tasks from memory");
        Ok(tasks)
    }

    async fn load_task_by_id(&self, id: &str) -> Result<Option<ScheduledTask>, PortError> {
        Ok(self.get(id).await)
    }
}

#[async_trait]
impl ExecutionPort for InMemoryTaskStore {
    async fn record_execution(
        &self,
        task_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<(), PortError> {
        self.update(task_id, |task| match outcome.status {
            ExecutionStatus::Success => {
                task.execution_count += 1;
                task.failure_count = 0;
            }
            ExecutionStatus::Failure => task.failure_count += 1,
        })
        .await?;

        self.executions
            .write()
            .await
            .push((task_id.to_string(), outcome.clone()));
        Ok(())
    }

    async fn update_next_run_at(
        &self,
        task_id: &str,
        next: Option<DateTime<Utc>>,
    ) -> Result<(), PortError> {
        self.update(task_id, |task| {
            if let Some(next) = next {
                task.next_run_at = next;
            }
        })
        .await
    }

    async fn mark_completed(&self, task_id: &str) -> Result<(), PortError> {
        self.update(task_id, |task| task.status = TaskStatus::Completed)
            .await
    }

    async fn mark_failed(&self, task_id: &str) -> Result<(), PortError> {
        self.update(task_id, |task| task.status = TaskStatus::Failed)
            .await
    }
}

/// Fans triggered events out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<TriggeredEvent>,
}

impl BroadcastNotifier {
    /// Create a notifier with no subscribers.
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self { tx })
    }

    /// Subscribe to triggered events.
    pub fn subscribe(&self) -> broadcast::Receiver<TriggeredEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationPort for BroadcastNotifier {
    async fn publish_triggered(&self, event: TriggeredEvent) -> Result<(), PortError> {
        let task_id = event.task_id.clone();
        match self.tx.send(event) {
            Ok(receivers) => trace!(task_id = %task_id, receivers, "published triggered event"),
            // No subscribers; the event is dropped.
            Err(_) => debug!(task_id = %task_id, "no subscribers for triggered event"),
        }
        Ok(())
    }
}
