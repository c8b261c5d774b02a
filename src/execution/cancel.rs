//! Cooperative cancellation for in-flight runs.

use crate::core::error::TaskError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag a task runner checks between units of work.
///
/// Cloning shares the flag. Cancellation is advisory: nothing stops a
/// runner that never looks at the token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Bail out with [`TaskError::Cancelled`] if cancellation was requested.
    ///
    /// Runners call this at their checkpoints:
    /// ```rust,ignore
    /// for task in tasks {
    ///     token.checkpoint()?;
    ///     task.run()?;
    /// }
    /// ```
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}
