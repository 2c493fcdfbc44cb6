//! Scheduler types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::recurrence::RecurrenceRule;

/// What sort of thing a task reminds the account about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Reminder,
    GoalCheckIn,
    Deadline,
    /// Any kind the engine does not know about; carried through untouched.
    #[serde(untagged)]
    Other(String),
}

/// Business priority of a task. Unrelated to heap ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Persisted lifecycle of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to fire.
    #[default]
    Pending,
    /// Fired for the last time.
    Completed,
    /// Gave up after repeated execution failures.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

/// Opaque task payload, forwarded verbatim into triggered events.
///
/// The engine only ever reads the optional `sourceType` and `sourceId`
/// string fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPayload(Map<String, Value>);

impl TaskPayload {
    /// Wrap a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Origin of the task, e.g. `"goal"`.
    pub fn source_type(&self) -> Option<&str> {
        self.0.get("sourceType").and_then(Value::as_str)
    }

    /// Identifier of the originating record.
    pub fn source_id(&self) -> Option<&str> {
        self.0.get("sourceId").and_then(Value::as_str)
    }

    /// The underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for TaskPayload {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A task snapshot as held by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    /// Stable identity.
    pub id: String,
    pub account_id: String,
    pub title: String,
    #[serde(default)]
    pub task_kind: TaskKind,
    #[serde(default)]
    pub priority_level: PriorityLevel,
    /// When the task should fire next. Mirrors the heap priority.
    pub next_run_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_rule: Option<RecurrenceRule>,
    #[serde(default)]
    pub payload: TaskPayload,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub execution_count: u32,
    /// Consecutive failures; reset after a successful run.
    #[serde(default)]
    pub failure_count: u32,
}

fn default_enabled() -> bool {
    true
}

impl ScheduledTask {
    /// Create an enabled, pending, one-shot task.
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        title: impl Into<String>,
        next_run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            title: title.into(),
            task_kind: TaskKind::default(),
            priority_level: PriorityLevel::default(),
            next_run_at,
            recurrence_rule: None,
            payload: TaskPayload::default(),
            enabled: true,
            status: TaskStatus::Pending,
            execution_count: 0,
            failure_count: 0,
        }
    }

    /// Attach a recurrence rule.
    pub fn with_recurrence(mut self, rule: RecurrenceRule) -> Self {
        self.recurrence_rule = Some(rule);
        self
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: TaskPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Heap key for this task: `next_run_at` in epoch milliseconds.
    pub fn heap_priority(&self) -> i64 {
        self.next_run_at.timestamp_millis()
    }

    /// Whether the engine may queue this task at all.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.status == TaskStatus::Pending
    }
}

/// Result of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// Execution record handed to the execution port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event published when a task fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredEvent {
    pub task_id: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub account_id: String,
    pub payload: TaskPayload,
    pub occurred_at: DateTime<Utc>,
}

impl TriggeredEvent {
    /// Build the event for `task` firing at `occurred_at`.
    pub fn for_task(task: &ScheduledTask, occurred_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            source_type: task.payload.source_type().map(String::from),
            source_id: task.payload.source_id().map(String::from),
            account_id: task.account_id.clone(),
            payload: task.payload.clone(),
            occurred_at,
        }
    }
}

/// Lifecycle of the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Stopped,
    /// Loading tasks; only observable from inside `start`.
    Starting,
    Running,
}

/// Read-only diagnostic snapshot of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: EngineState,
    pub running: bool,
    pub queue_size: usize,
    pub next_execution_time: Option<DateTime<Utc>>,
    /// Queued ids in heap array order (root first).
    pub queued_ids: Vec<String>,
    /// Executions dispatched but not yet reported back.
    pub in_flight: usize,
}
