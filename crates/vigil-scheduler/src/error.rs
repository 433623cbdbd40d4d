//! Scheduler error types.

use thiserror::Error;

/// Errors from building or running the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("duplicate probe name: {0}")]
    DuplicateName(String),

    #[error("probe {0}: interval must be greater than zero")]
    ZeroInterval(String),

    #[error("probe {0}: timeout must be greater than zero")]
    ZeroTimeout(String),

    /// Normal termination: every loop stopped on shutdown.
    #[error("scheduler cancelled")]
    Cancelled,

    #[error("probe loop panicked: {0}")]
    LoopPanicked(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
