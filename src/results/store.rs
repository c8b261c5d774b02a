//! Result store interface and the in-memory implementation.

use crate::core::error::{StoreError, StoreResult};
use crate::core::types::ResultId;
use crate::results::model::{ResultUpdate, ValidationResult};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Persistence boundary for run results.
///
/// Implementations hold no business logic beyond the status transition
/// rule enforced by [`ValidationResult::apply`].
pub trait ResultStore: Send + Sync {
    /// Persist a new result.
    fn insert(&self, result: ValidationResult) -> StoreResult<()>;

    /// Change fields of an existing result and return the stored record.
    fn update(&self, id: ResultId, update: ResultUpdate) -> StoreResult<ValidationResult>;

    /// Fetch results by id, ordered by creation time.
    ///
    /// Fails with [`StoreError::NotFound`] if any id is unknown.
    fn query(&self, ids: &[ResultId]) -> StoreResult<Vec<ValidationResult>>;

    /// Fetch every result, optionally only those for one plan, ordered by
    /// creation time.
    fn query_all(&self, plan_id: Option<&str>) -> StoreResult<Vec<ValidationResult>>;

    /// Fetch a single result.
    fn get(&self, id: ResultId) -> StoreResult<ValidationResult> {
        self.query(&[id])?
            .pop()
            .ok_or_else(|| StoreError::NotFound(vec![id.to_string()]))
    }
}

/// Store shared between the catalog and running workers.
pub type SharedStore = Arc<dyn ResultStore>;

/// Thread-safe in-memory result store.
///
/// Results are kept in insertion order, which breaks ties between results
/// created within the same clock tick.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: RwLock<IndexMap<ResultId, ValidationResult>>,
}

impl MemoryResultStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store wrapped in Arc for sharing.
    pub fn new_shared() -> SharedStore {
        Arc::new(Self::new())
    }

    /// Create a store pre-populated with results.
    pub fn from_results(results: impl IntoIterator<Item = ValidationResult>) -> Self {
        let map = results.into_iter().map(|r| (r.id, r)).collect();
        Self {
            results: RwLock::new(map),
        }
    }

    /// Snapshot of every result in insertion order.
    pub fn snapshot(&self) -> Vec<ValidationResult> {
        self.results.read().values().cloned().collect()
    }

    /// Number of stored results.
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}

fn sort_by_creation(results: &mut [ValidationResult]) {
    // Stable, so insertion order survives equal timestamps.
    results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

impl ResultStore for MemoryResultStore {
    fn insert(&self, result: ValidationResult) -> StoreResult<()> {
        log::debug!("Inserting result {} for validation {}", result.id, result.validation);
        self.results.write().insert(result.id, result);
        Ok(())
    }

    fn update(&self, id: ResultId, update: ResultUpdate) -> StoreResult<ValidationResult> {
        let mut results = self.results.write();
        let result = results
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(vec![id.to_string()]))?;
        result.apply(update);
        log::debug!("Updated result {} (status {})", id, result.status);
        Ok(result.clone())
    }

    fn query(&self, ids: &[ResultId]) -> StoreResult<Vec<ValidationResult>> {
        let results = self.results.read();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !results.contains_key(*id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::NotFound(missing));
        }

        let mut found: Vec<ValidationResult> = results
            .values()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect();
        sort_by_creation(&mut found);
        Ok(found)
    }

    fn query_all(&self, plan_id: Option<&str>) -> StoreResult<Vec<ValidationResult>> {
        let mut found: Vec<ValidationResult> = self
            .results
            .read()
            .values()
            .filter(|r| plan_id.map_or(true, |p| r.plan_id.as_deref() == Some(p)))
            .cloned()
            .collect();
        sort_by_creation(&mut found);
        Ok(found)
    }
}
