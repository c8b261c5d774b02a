//! Identifier, status and metadata types shared across the engine.

use crate::core::error::CatalogError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Maximum size in bytes of a metadata key or value.
pub const MAX_METADATA_LEN: usize = 255;

/// Compare catalog identifiers numerically when both are integers.
///
/// Numeric ids sort before non-numeric ones, so `"2" < "10" < "abc"`.
fn compare_catalog_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

macro_rules! catalog_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                compare_catalog_ids(&self.0, &other.0)
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

catalog_id!(
    /// Identifier of a validation, assigned by sorted definition order.
    ValidationId
);

catalog_id!(
    /// Identifier of a stage, assigned by sorted definition order.
    StageId
);

/// Identifier of a single run result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(pub Uuid);

impl ResultId {
    /// Create a new random result ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a result ID from its hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a caller-supplied plan id: empty strings count as absent.
pub fn plan_id_of(plan_id: Option<&str>) -> Option<&str> {
    plan_id.filter(|p| !p.is_empty())
}

/// Partition key for a validation's run history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanScope {
    /// Runs that do not depend on a deployment plan.
    Default,
    /// Runs against a specific plan.
    Plan(String),
}

impl PlanScope {
    /// The plan id this scope was created for, if any.
    pub fn plan_id(&self) -> Option<&str> {
        match self {
            PlanScope::Default => None,
            PlanScope::Plan(id) => Some(id),
        }
    }
}

impl fmt::Display for PlanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanScope::Default => f.write_str("default"),
            PlanScope::Plan(id) => write!(f, "plan:{}", id),
        }
    }
}

/// Status of a single run result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// The run is in flight.
    Running,
    /// Every subject of the run passed.
    Success,
    /// At least one subject failed, or the runner errored.
    Failed,
    /// The run was stopped before it finished.
    Canceled,
}

impl ResultStatus {
    /// Whether this status is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultStatus::Running)
    }

    /// Results only ever move from `running` to a terminal status.
    pub fn can_transition_to(&self, next: ResultStatus) -> bool {
        *self == ResultStatus::Running && next.is_terminal()
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultStatus::Running => "running",
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
            ResultStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Derived status of a validation or a stage for one plan scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Never run in this scope.
    New,
    /// A run is in flight.
    Running,
    /// The latest run passed.
    Success,
    /// The latest run failed.
    Failed,
    /// The latest run was stopped.
    Canceled,
    /// The validation needs a plan id and none was given.
    RequiresPlanId,
}

impl From<ResultStatus> for ValidationStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Running => ValidationStatus::Running,
            ResultStatus::Success => ValidationStatus::Success,
            ResultStatus::Failed => ValidationStatus::Failed,
            ResultStatus::Canceled => ValidationStatus::Canceled,
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationStatus::New => "new",
            ValidationStatus::Running => "running",
            ValidationStatus::Success => "success",
            ValidationStatus::Failed => "failed",
            ValidationStatus::Canceled => "canceled",
            ValidationStatus::RequiresPlanId => "requires_plan_id",
        };
        f.write_str(s)
    }
}

/// Bounded key/value metadata attached to a validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(IndexMap<String, String>);

impl Metadata {
    /// Build metadata, rejecting any key or value longer than
    /// [`MAX_METADATA_LEN`] bytes.
    pub fn new<I, K, V>(entries: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = IndexMap::new();
        for (key, value) in entries {
            let key = key.into();
            let value = value.into();
            check_metadata_len(&key, &key)?;
            check_metadata_len(&key, &value)?;
            map.insert(key, value);
        }
        Ok(Self(map))
    }

    /// Look up a metadata value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    /// Iterate over entries in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reject a metadata key or value over the size limit.
pub(crate) fn check_metadata_len(key: &str, field: &str) -> Result<(), CatalogError> {
    if field.len() > MAX_METADATA_LEN {
        return Err(CatalogError::MetadataTooLong {
            key: key.chars().take(32).collect(),
            len: field.len(),
        });
    }
    Ok(())
}
