//! Core types for the Vigil validation engine.
//!
//! This module contains the foundational pieces shared by every layer:
//! - Identifiers, plan scopes and status enums
//! - Bounded validation metadata
//! - Error types
//! - Engine configuration

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{EngineConfig, RunnerConfig};
pub use error::{
    CatalogError, EngineError, EngineResult, EntityKind, ErrorKind, StoreError, TaskError,
};
pub use types::{
    Metadata, PlanScope, ResultId, ResultStatus, StageId, ValidationId, ValidationStatus,
};
