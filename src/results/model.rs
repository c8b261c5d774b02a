//! The persisted record of one run attempt.

use crate::core::types::{ResultId, ResultStatus, ValidationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One run of a validation under one plan scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Result ID.
    pub id: ResultId,
    /// When the run started.
    pub created_at: DateTime<Utc>,
    /// Current status.
    pub status: ResultStatus,
    /// Validation this result belongs to.
    pub validation: ValidationId,
    /// Plan the run was requested for.
    pub plan_id: Option<String>,
    /// Runner report, serialized. `{}` until the run finishes.
    pub detailed_description: Value,
    /// Arguments the run was started with.
    pub arguments: Value,
}

impl ValidationResult {
    /// Create a result for a run that is starting now.
    pub fn running(validation: ValidationId, plan_id: Option<String>) -> Self {
        Self {
            id: ResultId::new(),
            created_at: Utc::now(),
            status: ResultStatus::Running,
            validation,
            plan_id,
            detailed_description: Value::Object(Default::default()),
            arguments: Value::Object(Default::default()),
        }
    }

    /// Attach run arguments.
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    /// Apply an update, keeping terminal statuses sticky.
    ///
    /// Returns `true` when the status changed.
    pub fn apply(&mut self, update: ResultUpdate) -> bool {
        let mut changed = false;
        if let Some(next) = update.status {
            if self.status.can_transition_to(next) {
                self.status = next;
                changed = true;
            } else if self.status != next {
                log::debug!(
                    "Result {}: ignoring status change {} -> {}",
                    self.id,
                    self.status,
                    next
                );
            }
        }
        if let Some(description) = update.detailed_description {
            self.detailed_description = description;
        }
        changed
    }
}

/// Fields to change on an existing result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultUpdate {
    /// New status, subject to the running -> terminal rule.
    pub status: Option<ResultStatus>,
    /// New detailed description.
    pub detailed_description: Option<Value>,
}

impl ResultUpdate {
    /// Update only the status.
    pub fn status(status: ResultStatus) -> Self {
        Self {
            status: Some(status),
            detailed_description: None,
        }
    }

    /// Update status and description together.
    pub fn finished(status: ResultStatus, detailed_description: Value) -> Self {
        Self {
            status: Some(status),
            detailed_description: Some(detailed_description),
        }
    }
}
