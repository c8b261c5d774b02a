//! A single validation: its definition, run history and run protocol.

use crate::core::error::{EngineError, EngineResult, EntityKind};
use crate::core::types::{
    plan_id_of, Metadata, PlanScope, ResultId, ValidationId, ValidationStatus,
};
use crate::execution::coordinator::{RunCoordinator, RunRequest};
use crate::execution::runner::SharedRunner;
use crate::results::model::ValidationResult;
use crate::results::store::SharedStore;
use std::fmt;
use std::path::{Path, PathBuf};

/// One verification procedure and its run history.
///
/// Status and results are always read through the result store; the
/// validation itself only keeps result ids per plan scope.
pub struct Validation {
    id: ValidationId,
    name: String,
    description: String,
    procedure: PathBuf,
    requires_plan: bool,
    reference: Option<String>,
    metadata: Metadata,
    coordinator: RunCoordinator,
    store: SharedStore,
    runner: SharedRunner,
}

impl fmt::Debug for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("procedure", &self.procedure)
            .field("requires_plan", &self.requires_plan)
            .finish_non_exhaustive()
    }
}

impl Validation {
    /// Create a validation with no run history.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ValidationId,
        name: impl Into<String>,
        description: impl Into<String>,
        procedure: impl Into<PathBuf>,
        requires_plan: bool,
        metadata: Metadata,
        store: SharedStore,
        runner: SharedRunner,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            procedure: procedure.into(),
            requires_plan,
            reference: None,
            metadata,
            coordinator: RunCoordinator::new(),
            store,
            runner,
        }
    }

    /// Attach a documentation link.
    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn id(&self) -> &ValidationId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Procedure file handed to the task runner.
    pub fn procedure(&self) -> &Path {
        &self.procedure
    }

    pub fn requires_plan(&self) -> bool {
        self.requires_plan
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Whether `plan_id` leaves this validation without the plan it needs.
    pub fn missing_plan_id(&self, plan_id: Option<&str>) -> bool {
        self.requires_plan && plan_id_of(plan_id).is_none()
    }

    /// Scope a request is recorded under, or `None` when a required plan is missing.
    ///
    /// Validations that do not need a plan always use the default scope.
    pub fn resolve_scope(&self, plan_id: Option<&str>) -> Option<PlanScope> {
        match (self.requires_plan, plan_id_of(plan_id)) {
            (false, _) => Some(PlanScope::Default),
            (true, Some(plan)) => Some(PlanScope::Plan(plan.to_string())),
            (true, None) => None,
        }
    }

    fn scope_for_action(&self, plan_id: Option<&str>) -> EngineResult<PlanScope> {
        self.resolve_scope(plan_id)
            .ok_or_else(|| EngineError::requires_plan(EntityKind::Validation, &self.id))
    }

    /// Current status for a plan.
    pub fn status(&self, plan_id: Option<&str>) -> EngineResult<ValidationStatus> {
        let scope = match self.resolve_scope(plan_id) {
            Some(scope) => scope,
            None => return Ok(ValidationStatus::RequiresPlanId),
        };
        match self.coordinator.latest_result_id(&scope) {
            None => Ok(ValidationStatus::New),
            Some(id) => Ok(self.store.get(id)?.status.into()),
        }
    }

    /// Result ids for a plan in creation order.
    ///
    /// Without a plan, a validation that requires one reports the ids of
    /// every scope.
    pub fn result_ids(&self, plan_id: Option<&str>) -> Vec<ResultId> {
        match self.resolve_scope(plan_id) {
            Some(scope) => self.coordinator.result_ids(&scope),
            None => self.coordinator.all_result_ids(),
        }
    }

    /// Results for a plan ordered by creation time.
    pub fn results(&self, plan_id: Option<&str>) -> EngineResult<Vec<ValidationResult>> {
        let ids = self.result_ids(plan_id);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.query(&ids)?)
    }

    /// Most recent result for a plan, if the validation ever ran there.
    pub fn latest_result(&self, plan_id: Option<&str>) -> EngineResult<Option<ValidationResult>> {
        let scope = match self.resolve_scope(plan_id) {
            Some(scope) => scope,
            None => return Ok(None),
        };
        match self.coordinator.latest_result_id(&scope) {
            None => Ok(None),
            Some(id) => Ok(Some(self.store.get(id)?)),
        }
    }

    /// Record a stored result in the run history of its scope.
    ///
    /// Returns `false` when the result carries no plan but this validation
    /// needs one.
    pub(crate) fn restore_result(&self, result: &ValidationResult) -> bool {
        match self.resolve_scope(result.plan_id.as_deref()) {
            Some(scope) => {
                self.coordinator.restore(&scope, result.id);
                true
            }
            None => false,
        }
    }

    /// Start a run and return its result id without waiting for it.
    pub fn run(&self, plan_id: Option<&str>) -> EngineResult<ResultId> {
        let scope = self.scope_for_action(plan_id)?;
        self.coordinator.start(RunRequest {
            validation: self.id.clone(),
            scope,
            plan_id: plan_id_of(plan_id).map(String::from),
            procedure: self.procedure.clone(),
            store: self.store.clone(),
            runner: self.runner.clone(),
        })
    }

    /// Cancel the in-flight run for a plan.
    pub fn stop(&self, plan_id: Option<&str>) -> EngineResult<ResultId> {
        let scope = self.scope_for_action(plan_id)?;
        self.coordinator.stop(&self.id, &scope, &self.store)
    }

    /// Whether a run is in flight for a plan.
    pub fn is_running(&self, plan_id: Option<&str>) -> bool {
        self.resolve_scope(plan_id)
            .map(|scope| self.coordinator.is_running(&scope))
            .unwrap_or(false)
    }

    /// Block until the latest run for a plan has finished.
    pub fn wait(&self, plan_id: Option<&str>) -> EngineResult<()> {
        let scope = self.scope_for_action(plan_id)?;
        self.coordinator.wait(&scope);
        Ok(())
    }
}
