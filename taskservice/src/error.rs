//! Dispatch error types

use thiserror::Error;

/// Errors surfaced by servers and registries
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Server {name} already exists")]
    DuplicateName { name: String },

    #[error("Server {name} not found")]
    NotFound { name: String },

    #[error("Server {name} is stopped")]
    Stopped { name: String },

    #[error("Server {name} already started")]
    AlreadyStarted { name: String },

    #[error("Server {name} must be started inside a Tokio runtime")]
    NoRuntime { name: String },

    #[error("Context cancelled")]
    Cancelled,

    #[error("Context deadline exceeded")]
    DeadlineExceeded,

    #[error("Superseded by a newer message")]
    Coalesced,

    #[error("Handler panicked on worker {worker}: {message}")]
    HandlerPanicked { worker: usize, message: String },

    #[error("Handler error: {0}")]
    Handler(eyre::Report),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

/// Result alias used across the crate
pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    /// Check if the caller's context ended before a reply arrived
    pub fn is_context_error(&self) -> bool {
        matches!(self, DispatchError::Cancelled | DispatchError::DeadlineExceeded)
    }

    /// Check if retrying the same call could succeed
    ///
    /// Registry and lifecycle failures are permanent for a given name;
    /// context and coalescing failures depend on timing.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Cancelled | DispatchError::DeadlineExceeded | DispatchError::Coalesced => true,
            DispatchError::DuplicateName { .. }
            | DispatchError::NotFound { .. }
            | DispatchError::Stopped { .. }
            | DispatchError::AlreadyStarted { .. }
            | DispatchError::NoRuntime { .. }
            | DispatchError::HandlerPanicked { .. }
            | DispatchError::Handler(_)
            | DispatchError::InvalidOptions(_) => false,
        }
    }

    /// Borrow the handler's own error, if this is one
    pub fn handler_error(&self) -> Option<&eyre::Report> {
        match self {
            DispatchError::Handler(report) => Some(report),
            _ => None,
        }
    }
}
