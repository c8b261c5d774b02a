//! Execution module.
//!
//! This module runs validation procedures: cancellation, task runners and
//! the per-scope run coordinator.

pub mod cancel;
pub mod coordinator;
pub mod runner;

pub use cancel::CancellationToken;
pub use coordinator::{RunCoordinator, RunHandle, RunRequest};
pub use runner::{
    CommandTaskRunner, RunContext, RunReport, SharedRunner, SubjectOutcome, TaskRunner,
};
