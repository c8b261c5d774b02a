//! # Vigil - Validation Execution Engine
//!
//! Vigil keeps a catalog of named verification procedures ("validations"),
//! grouped into stages, and runs them against a deployment target that may
//! be scoped by a plan id. It records every run as a result, derives the
//! status of validations and stages from those results, and supports
//! cooperative cancellation of in-flight runs.
//!
//! ## Features
//!
//! - **Single-flight runs**: at most one active run per validation and plan scope
//! - **Asynchronous triggers**: `run` returns as soon as the result is recorded
//! - **Prompt cancellation**: `stop` marks the result `canceled` before it returns
//! - **Stage aggregation**: one status for a whole group of validations
//! - **Pluggable seams**: task runners, result stores and catalog loaders are traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vigil::prelude::*;
//!
//! let config = EngineConfig::new().with_base_dir("/usr/share/vigil");
//! let catalog = Catalog::from_config(&config)?;
//!
//! let validation = catalog.get_validation("1")?;
//! validation.run(Some("overcloud"))?;
//! validation.wait(Some("overcloud"))?;
//!
//! println!("{}", validation.status(Some("overcloud"))?);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: identifiers, statuses, errors and configuration
//! - [`results`]: the result model and result stores
//! - [`execution`]: task runners, cancellation and run coordination
//! - [`catalog`]: definition loading, validations, stages and views

#![warn(clippy::all)]

pub mod catalog;
pub mod core;
pub mod execution;
pub mod results;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use vigil::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{
        Metadata, PlanScope, ResultId, ResultStatus, StageId, ValidationId, ValidationStatus,
    };

    // Errors
    pub use crate::core::error::{
        CatalogError, EngineError, EngineResult, EntityKind, ErrorKind, StoreError, TaskError,
    };

    // Configuration
    pub use crate::core::config::{EngineConfig, RunnerConfig};

    // Results
    pub use crate::results::{
        JsonFileResultStore, MemoryResultStore, ResultStore, ResultUpdate, SharedStore,
        ValidationResult,
    };

    // Execution
    pub use crate::execution::{
        CancellationToken, CommandTaskRunner, RunContext, RunReport, SharedRunner, SubjectOutcome,
        TaskRunner,
    };

    // Catalog
    pub use crate::catalog::{
        Catalog, CatalogLoader, FsCatalogLoader, ResultView, Stage, StageDefinition,
        StageRunSummary, StageStopSummary, StageView, Validation, ValidationDefinition,
        ValidationView,
    };
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
