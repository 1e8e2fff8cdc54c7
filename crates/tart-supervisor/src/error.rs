//! Orchestrator error taxonomy.
//!
//! Shared by every crate above the store; the command layer renders each
//! variant as a single `Err: ...` line.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TartError {
    #[error("A tart by that pushURL does not exist")]
    NotFound(String),

    #[error("A tart by that pushURL already exists")]
    AlreadyExists(String),

    #[error("You ({0}) are not an owner of the specified tart")]
    Unauthorized(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Tart {0} is already running")]
    AlreadyRunning(String),

    #[error("Tart {0} is not running")]
    NotRunning(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("A tart must always have at least one owner. Add another owner or delete the tart.")]
    LastOwner,

    #[error("state store error: {0}")]
    State(#[from] tart_state::StateError),
}

pub type TartResult<T> = Result<T, TartError>;
