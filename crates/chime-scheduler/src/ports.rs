//! Narrow interfaces between the engine and its collaborators.
//!
//! Persistence and messaging live outside this crate. The engine only sees
//! these traits, injected at construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PortError;
use crate::types::{ExecutionOutcome, ScheduledTask, TriggeredEvent};

/// Supplies task records to the engine.
#[async_trait]
pub trait TaskLoadPort: Send + Sync {
    /// All enabled tasks that have not completed, failed or been cancelled.
    async fn load_pending_tasks(&self) -> Result<Vec<ScheduledTask>, PortError>;

    /// A single task, used by `add_task`.
    async fn load_task_by_id(&self, id: &str) -> Result<Option<ScheduledTask>, PortError>;
}

/// Receives execution bookkeeping from the engine.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    /// Record the outcome of one execution attempt.
    async fn record_execution(&self, task_id: &str, outcome: &ExecutionOutcome)
    -> Result<(), PortError>;

    /// Persist the next run time, or `None` when the task will not run again.
    async fn update_next_run_at(
        &self,
        task_id: &str,
        next: Option<DateTime<Utc>>,
    ) -> Result<(), PortError>;

    /// The task fired for the last time.
    async fn mark_completed(&self, task_id: &str) -> Result<(), PortError>;

    /// The task exhausted its failure budget.
    async fn mark_failed(&self, task_id: &str) -> Result<(), PortError>;
}

/// Publishes fired-task events to downstream consumers.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn publish_triggered(&self, event: TriggeredEvent) -> Result<(), PortError>;
}
