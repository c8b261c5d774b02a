//! JSON snapshot persistence for results.

use crate::core::error::StoreResult;
use crate::core::types::ResultId;
use crate::results::model::{ResultUpdate, ValidationResult};
use crate::results::store::{MemoryResultStore, ResultStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk snapshot layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSnapshot {
    /// Snapshot format version
    pub version: String,
    /// All results in insertion order
    pub results: Vec<ValidationResult>,
}

impl ResultSnapshot {
    /// Current format version.
    pub const VERSION: &'static str = "1.0.0";

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Result store that mirrors every mutation to a JSON file.
///
/// Reads are served from memory. The file is rewritten in full after each
/// insert or update, through a temporary file and a rename.
pub struct JsonFileResultStore {
    path: PathBuf,
    inner: MemoryResultStore,
    write_lock: Mutex<()>,
}

impl JsonFileResultStore {
    /// Open a store backed by `path`, loading any existing snapshot.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let snapshot = ResultSnapshot::from_json(&text)?;
            log::info!("Loaded {} results from {}", snapshot.results.len(), path.display());
            MemoryResultStore::from_results(snapshot.results)
        } else {
            MemoryResultStore::new()
        };

        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let snapshot = ResultSnapshot {
            version: ResultSnapshot::VERSION.to_string(),
            results: self.inner.snapshot(),
        };
        let json = snapshot.to_json()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ResultStore for JsonFileResultStore {
    fn insert(&self, result: ValidationResult) -> StoreResult<()> {
        self.inner.insert(result)?;
        self.flush()
    }

    fn update(&self, id: ResultId, update: ResultUpdate) -> StoreResult<ValidationResult> {
        let updated = self.inner.update(id, update)?;
        self.flush()?;
        Ok(updated)
    }

    fn query(&self, ids: &[ResultId]) -> StoreResult<Vec<ValidationResult>> {
        self.inner.query(ids)
    }

    fn query_all(&self, plan_id: Option<&str>) -> StoreResult<Vec<ValidationResult>> {
        self.inner.query_all(plan_id)
    }
}
