//! Error types for the scheduler.

use thiserror::Error;

/// Errors returned by port implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// The requested task does not exist.
    #[error("task not found: {0}")]
    NotFound(String),

    /// The backing store or bus could not be reached.
    #[error("port unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The engine actor has shut down.
    #[error("engine is closed")]
    EngineClosed,

    /// Invalid engine configuration.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}
