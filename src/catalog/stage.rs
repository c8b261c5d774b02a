//! Stages: ordered groups of validations run and reported as one unit.

use crate::catalog::registry::Catalog;
use crate::catalog::validation::Validation;
use crate::core::error::{EngineError, EngineResult, EntityKind};
use crate::core::types::{ResultId, StageId, ValidationId, ValidationStatus};
use rayon::prelude::*;

/// An ordered group of validations.
///
/// Members are held by id and resolved through the [`Catalog`] on every
/// call, so a stage never carries validation state of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    id: StageId,
    name: String,
    description: String,
    phase: String,
    validations: Vec<ValidationId>,
}

/// Outcome of fanning a stage run out to its members.
#[derive(Debug, Default)]
pub struct StageRunSummary {
    /// Members that started, with the result each run writes to.
    pub started: Vec<(ValidationId, ResultId)>,
    /// Members that refused to start.
    pub failed: Vec<(ValidationId, EngineError)>,
}

/// Outcome of stopping a stage.
#[derive(Debug, Default)]
pub struct StageStopSummary {
    /// Members whose in-flight run was cancelled.
    pub stopped: Vec<(ValidationId, ResultId)>,
    /// Members that failed to stop for a reason other than not running.
    pub failed: Vec<(ValidationId, EngineError)>,
}

impl Stage {
    /// Create a stage over the given member ids, in order.
    pub fn new(
        id: StageId,
        name: impl Into<String>,
        description: impl Into<String>,
        phase: impl Into<String>,
        validations: Vec<ValidationId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            phase: phase.into(),
            validations,
        }
    }

    pub fn id(&self) -> &StageId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Free-form phase label, e.g. `pre-deployment`.
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Member ids in stage order.
    pub fn validation_ids(&self) -> &[ValidationId] {
        &self.validations
    }

    /// Resolve members through the catalog.
    pub fn members<'c>(&self, catalog: &'c Catalog) -> EngineResult<Vec<&'c Validation>> {
        self.validations
            .iter()
            .map(|id| catalog.get_validation(id.as_str()))
            .collect()
    }

    fn check_plan(&self, members: &[&Validation], plan_id: Option<&str>) -> EngineResult<()> {
        if members.iter().any(|v| v.missing_plan_id(plan_id)) {
            return Err(EngineError::requires_plan(EntityKind::Stage, &self.id));
        }
        Ok(())
    }

    /// Aggregate status of the members for a plan.
    pub fn status(
        &self,
        catalog: &Catalog,
        plan_id: Option<&str>,
    ) -> EngineResult<ValidationStatus> {
        let statuses = self
            .members(catalog)?
            .iter()
            .map(|v| v.status(plan_id))
            .collect::<EngineResult<Vec<_>>>()?;
        aggregate_status(&statuses)
    }

    /// Start every member concurrently.
    ///
    /// Nothing starts if any member needs a plan that was not given, or if
    /// the stage is already running. Otherwise members that fail to start
    /// are reported in the summary and do not affect their siblings. A
    /// stage whose members are partly `new` and partly `success` has no
    /// aggregate status and is still allowed to run.
    pub fn run(
        &self,
        catalog: &Catalog,
        plan_id: Option<&str>,
    ) -> EngineResult<StageRunSummary> {
        let members = self.members(catalog)?;
        self.check_plan(&members, plan_id)?;
        match self.status(catalog, plan_id) {
            Ok(ValidationStatus::Running) => {
                return Err(EngineError::already_running(EntityKind::Stage, &self.id));
            }
            Ok(_) => {}
            Err(EngineError::Internal(message)) => {
                log::debug!("Stage {} has no aggregate status: {}", self.id, message);
            }
            Err(e) => return Err(e),
        }

        let outcomes: Vec<(ValidationId, EngineResult<ResultId>)> = members
            .par_iter()
            .map(|v| (v.id().clone(), v.run(plan_id)))
            .collect();

        let mut summary = StageRunSummary::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(result_id) => summary.started.push((id, result_id)),
                Err(e) => {
                    log::warn!("Stage {}: validation {} did not start: {}", self.id, id, e);
                    summary.failed.push((id, e));
                }
            }
        }
        log::info!(
            "Stage {} started {} of {} validations",
            self.id,
            summary.started.len(),
            members.len()
        );
        Ok(summary)
    }

    /// Stop every member that is running.
    pub fn stop(
        &self,
        catalog: &Catalog,
        plan_id: Option<&str>,
    ) -> EngineResult<StageStopSummary> {
        let members = self.members(catalog)?;
        self.check_plan(&members, plan_id)?;

        let mut summary = StageStopSummary::default();
        for v in members {
            match v.stop(plan_id) {
                Ok(result_id) => summary.stopped.push((v.id().clone(), result_id)),
                Err(EngineError::NotRunning { .. }) => {}
                Err(e) => summary.failed.push((v.id().clone(), e)),
            }
        }
        Ok(summary)
    }

    /// Block until every member's latest run for the plan has finished.
    pub fn wait(&self, catalog: &Catalog, plan_id: Option<&str>) -> EngineResult<()> {
        let members = self.members(catalog)?;
        self.check_plan(&members, plan_id)?;
        for v in members {
            v.wait(plan_id)?;
        }
        Ok(())
    }
}

/// Fold member statuses into a stage status. First matching rule wins:
///
/// 1. all `new` (or no members) is `new`
/// 2. all `success` is `success`
/// 3. any `requires_plan_id`
/// 4. any `running`
/// 5. any `failed`
/// 6. any `canceled`
pub fn aggregate_status(statuses: &[ValidationStatus]) -> EngineResult<ValidationStatus> {
    use ValidationStatus::*;

    let all = |s: ValidationStatus| statuses.iter().all(|x| *x == s);
    let any = |s: ValidationStatus| statuses.iter().any(|x| *x == s);

    if all(New) {
        Ok(New)
    } else if all(Success) {
        Ok(Success)
    } else if any(RequiresPlanId) {
        Ok(RequiresPlanId)
    } else if any(Running) {
        Ok(Running)
    } else if any(Failed) {
        Ok(Failed)
    } else if any(Canceled) {
        Ok(Canceled)
    } else {
        // Only a mix of `new` and `success` gets here.
        Err(EngineError::Internal(format!(
            "cannot aggregate stage status from {:?}",
            statuses
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ValidationStatus::*;

    #[test]
    fn test_aggregation_examples() {
        assert_eq!(aggregate_status(&[New, New]).unwrap(), New);
        assert_eq!(aggregate_status(&[Success, Success]).unwrap(), Success);
        assert_eq!(aggregate_status(&[Success, Failed]).unwrap(), Failed);
        assert_eq!(aggregate_status(&[Running, Success]).unwrap(), Running);
        assert_eq!(aggregate_status(&[RequiresPlanId, New]).unwrap(), RequiresPlanId);
        assert_eq!(aggregate_status(&[Canceled, Success]).unwrap(), Canceled);
    }

    #[test]
    fn test_aggregation_precedence() {
        assert_eq!(aggregate_status(&[]).unwrap(), New);
        assert_eq!(
            aggregate_status(&[Failed, RequiresPlanId, Running]).unwrap(),
            RequiresPlanId
        );
        assert_eq!(aggregate_status(&[Canceled, Running]).unwrap(), Running);
        assert_eq!(aggregate_status(&[Canceled, Failed, New]).unwrap(), Failed);
    }

    #[test]
    fn test_new_and_success_mix_is_internal() {
        let err = aggregate_status(&[New, Success]).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_status() -> impl Strategy<Value = ValidationStatus> {
            prop_oneof![
                Just(New),
                Just(Running),
                Just(Success),
                Just(Failed),
                Just(Canceled),
                Just(RequiresPlanId),
            ]
        }

        fn blocking(s: ValidationStatus) -> bool {
            matches!(s, RequiresPlanId | Running | Failed | Canceled)
        }

        proptest! {
            #[test]
            fn aggregate_is_order_independent(
                statuses in prop::collection::vec(arb_status(), 0..8),
            ) {
                let mut reversed = statuses.clone();
                reversed.reverse();
                prop_assert_eq!(
                    aggregate_status(&statuses).ok(),
                    aggregate_status(&reversed).ok()
                );
            }

            #[test]
            fn aggregate_picks_a_member_status(
                statuses in prop::collection::vec(arb_status(), 1..8),
            ) {
                if let Ok(status) = aggregate_status(&statuses) {
                    prop_assert!(statuses.contains(&status));
                }
            }

            #[test]
            fn aggregate_fails_only_on_new_success_mix(
                statuses in prop::collection::vec(arb_status(), 0..8),
            ) {
                let result = aggregate_status(&statuses);
                let has_blocking = statuses.iter().any(|s| blocking(*s));
                let uniform = statuses.windows(2).all(|w| w[0] == w[1]);
                prop_assert_eq!(result.is_err(), !has_blocking && !uniform);
            }

            #[test]
            fn requires_plan_dominates(
                statuses in prop::collection::vec(arb_status(), 0..8),
                position in 0usize..8,
            ) {
                let mut statuses = statuses;
                let index = position.min(statuses.len());
                statuses.insert(index, RequiresPlanId);
                prop_assert_eq!(aggregate_status(&statuses).unwrap(), RequiresPlanId);
            }
        }
    }
}
