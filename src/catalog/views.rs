//! Serializable snapshots of catalog entries for API and CLI output.

use crate::catalog::registry::Catalog;
use crate::catalog::stage::Stage;
use crate::catalog::validation::Validation;
use crate::core::error::{EngineError, EngineResult};
use crate::core::types::{Metadata, ResultId, ResultStatus, ValidationStatus};
use crate::results::model::ValidationResult;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A run result as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub id: ResultId,
    pub validation: String,
    pub status: ResultStatus,
    pub created_at: DateTime<Utc>,
    pub plan_id: Option<String>,
    pub detailed_description: Value,
}

impl From<&ValidationResult> for ResultView {
    fn from(result: &ValidationResult) -> Self {
        Self {
            id: result.id,
            validation: result.validation.to_string(),
            status: result.status,
            created_at: result.created_at,
            plan_id: result.plan_id.clone(),
            detailed_description: result.detailed_description.clone(),
        }
    }
}

/// A validation and its state for one plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationView {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub metadata: Metadata,
    pub require_plan: bool,
    pub status: ValidationStatus,
    /// Absent when the status is `requires_plan_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_result: Option<ResultView>,
    pub results: Vec<ResultId>,
}

impl ValidationView {
    pub fn build(validation: &Validation, plan_id: Option<&str>) -> EngineResult<Self> {
        let status = validation.status(plan_id)?;
        let latest_result = match status {
            ValidationStatus::RequiresPlanId => None,
            _ => validation.latest_result(plan_id)?.as_ref().map(ResultView::from),
        };
        Ok(Self {
            id: validation.id().to_string(),
            name: validation.name().to_string(),
            description: validation.description().to_string(),
            reference: validation.reference().map(String::from),
            metadata: validation.metadata().clone(),
            require_plan: validation.requires_plan(),
            status,
            latest_result,
            results: validation.result_ids(plan_id),
        })
    }
}

/// A stage, its aggregate status and its members for one plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub stage: String,
    /// `None` when the member statuses do not aggregate; written as `unknown`.
    #[serde(serialize_with = "serialize_stage_status")]
    pub status: Option<ValidationStatus>,
    pub validations: Vec<ValidationView>,
}

fn serialize_stage_status<S: Serializer>(
    status: &Option<ValidationStatus>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match status {
        Some(status) => status.serialize(serializer),
        None => serializer.serialize_str("unknown"),
    }
}

impl StageView {
    pub fn build(stage: &Stage, catalog: &Catalog, plan_id: Option<&str>) -> EngineResult<Self> {
        let validations = stage
            .members(catalog)?
            .into_iter()
            .map(|v| ValidationView::build(v, plan_id))
            .collect::<EngineResult<Vec<_>>>()?;
        let status = match stage.status(catalog, plan_id) {
            Ok(status) => Some(status),
            Err(EngineError::Internal(message)) => {
                log::warn!("Stage {}: {}", stage.id(), message);
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            id: stage.id().to_string(),
            name: stage.name().to_string(),
            description: stage.description().to_string(),
            stage: stage.phase().to_string(),
            status,
            validations,
        })
    }
}

impl Catalog {
    /// Views of every validation in listing order.
    pub fn validation_views(&self, plan_id: Option<&str>) -> EngineResult<Vec<ValidationView>> {
        self.all_validations()
            .map(|v| ValidationView::build(v, plan_id))
            .collect()
    }

    /// Views of every stage in listing order.
    pub fn stage_views(&self, plan_id: Option<&str>) -> EngineResult<Vec<StageView>> {
        self.all_stages()
            .map(|s| StageView::build(s, self, plan_id))
            .collect()
    }
}
