//! Run results and their persistence.

pub mod file_store;
pub mod model;
pub mod store;

pub use file_store::JsonFileResultStore;
pub use model::{ResultUpdate, ValidationResult};
pub use store::{MemoryResultStore, ResultStore, SharedStore};
