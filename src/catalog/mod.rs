//! Catalog of validations and stages.
//!
//! Definitions are discovered by a [`CatalogLoader`], linked into a
//! [`Catalog`] once at startup, and then served by id.

pub mod loader;
pub mod registry;
pub mod stage;
pub mod validation;
pub mod views;

pub use loader::{CatalogLoader, FsCatalogLoader, StageDefinition, ValidationDefinition};
pub use registry::Catalog;
pub use stage::{aggregate_status, Stage, StageRunSummary, StageStopSummary};
pub use validation::Validation;
pub use views::{ResultView, StageView, ValidationView};
