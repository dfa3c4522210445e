//! Context - cancellation and deadline carrier for messages
//!
//! A `Context` travels with every message. Callers use it to bound how long
//! a send may wait; handlers receive a clone and may observe it too.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::DispatchError;

/// Cancellation token plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never ends unless cancelled explicitly
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child that ends after `timeout` (or earlier, with its parent)
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        debug!(?timeout, "Context::with_timeout: called");
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child that ends at `deadline` (or earlier, with its parent)
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child that can be cancelled without affecting this context
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        debug!("Context::cancel: called");
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why this context has ended, or `None` while it is still live
    pub fn err(&self) -> Option<DispatchError> {
        if self.token.is_cancelled() {
            return Some(DispatchError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DispatchError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context ends and return the reason
    pub async fn done(&self) -> DispatchError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => DispatchError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => DispatchError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                DispatchError::Cancelled
            }
        }
    }
}

impl From<CancellationToken> for Context {
    fn from(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }
}
