//! Error types for Vigil.
//!
//! Uses thiserror for structured errors with context. Errors are designed to:
//! - Carry the identifier of the entity that rejected the request
//! - Map onto a small, serializable set of kinds for API layers
//! - Keep load-time, storage and runner failures in separate layers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which kind of catalog entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A single validation.
    Validation,
    /// A group of validations.
    Stage,
    /// A run result.
    Result,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Validation => f.write_str("Validation"),
            EntityKind::Stage => f.write_str("Stage"),
            EntityKind::Result => f.write_str("Result"),
        }
    }
}

/// Top-level error type for engine operations.
///
/// Every public operation returns this type; the lower layers convert
/// into it automatically.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{kind} {id} does not exist")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} {id} requires a plan id")]
    RequiresPlan { kind: EntityKind, id: String },

    #[error("{kind} {id} is already running")]
    AlreadyRunning { kind: EntityKind, id: String },

    #[error("Validation {id} is not running")]
    NotRunning { id: String },

    #[error("Metadata entry '{key}' is too long ({len} bytes)")]
    MetadataTooLong { key: String, len: usize },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Catalog error: {0}")]
    Catalog(CatalogError),

    #[error("Result store error: {0}")]
    Store(StoreError),
}

/// Errors raised while loading validation and stage definitions.
///
/// Any of these aborts the whole catalog load.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid discovery pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Metadata entry '{key}' is too long ({len} bytes)")]
    MetadataTooLong { key: String, len: usize },
}

/// Errors from a result store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Results not found: {0:?}")]
    NotFound(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors reported by a task runner.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Validation was cancelled")]
    Cancelled,

    #[error("Validation failed to execute: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Error Utilities
// ============================================================================

/// Coarse error classification for API layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    RequiresPlan,
    AlreadyRunning,
    NotRunning,
    MetadataTooLong,
    InternalError,
}

impl ErrorKind {
    /// HTTP status code a REST layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::RequiresPlan => 400,
            ErrorKind::AlreadyRunning | ErrorKind::NotRunning => 409,
            ErrorKind::MetadataTooLong | ErrorKind::InternalError => 500,
        }
    }
}

impl EngineError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::RequiresPlan { .. } => ErrorKind::RequiresPlan,
            EngineError::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            EngineError::NotRunning { .. } => ErrorKind::NotRunning,
            EngineError::MetadataTooLong { .. }
            | EngineError::Catalog(CatalogError::MetadataTooLong { .. }) => {
                ErrorKind::MetadataTooLong
            }
            EngineError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            EngineError::Internal(_) | EngineError::Catalog(_) | EngineError::Store(_) => {
                ErrorKind::InternalError
            }
        }
    }

    pub(crate) fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn requires_plan(kind: EntityKind, id: impl fmt::Display) -> Self {
        EngineError::RequiresPlan {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn already_running(kind: EntityKind, id: impl fmt::Display) -> Self {
        EngineError::AlreadyRunning {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<CatalogError> for EngineError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::MetadataTooLong { key, len } => EngineError::MetadataTooLong { key, len },
            other => EngineError::Catalog(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(ids) => EngineError::NotFound {
                kind: EntityKind::Result,
                id: ids.join(","),
            },
            other => EngineError::Store(other),
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for result store operations.
pub type StoreResult<T> = Result<T, StoreError>;
