//! Pool error types.

use thiserror::Error;

use canopy_state::TaskId;

/// Errors that can occur during pool operations.
#[derive(Debug, Error, PartialEq)]
pub enum PoolError {
    #[error("requested worker ceiling {requested} outside [{min}, {max}]")]
    CapacityExceeded { requested: u32, min: u32, max: u32 },

    #[error("invalid worker bounds: min {min} exceeds max {max}")]
    InvalidBounds { min: u32, max: u32 },

    #[error("task already tracked: {0}")]
    DuplicateTask(TaskId),

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

pub type PoolResult<T> = Result<T, PoolError>;
