//! Heap-driven reminder dispatch engine for Chime.
//!
//! This crate provides the scheduling core that:
//! - Keeps pending reminders in a binary min-heap keyed by next run time
//! - Arms a single timer for the earliest reminder instead of polling storage
//! - Recomputes daily/weekly/monthly/yearly recurrences after each firing
//! - Talks to persistence and messaging only through narrow async ports

mod clock;
mod config;
mod engine;
mod error;
pub mod heap;
pub mod memory;
mod ports;
pub mod recurrence;
mod types;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{AddOutcome, EngineHandle, ReminderEngine};
pub use error::{PortError, SchedulerError};
pub use heap::{HeapEntry, TimerHeap};
pub use ports::{ExecutionPort, NotificationPort, TaskLoadPort};
pub use recurrence::{RecurrenceKind, RecurrenceRule, next_occurrence};
pub use types::{
    EngineState, EngineStatus, ExecutionOutcome, ExecutionStatus, PriorityLevel, ScheduledTask,
    TaskKind, TaskPayload, TaskStatus, TriggeredEvent,
};
