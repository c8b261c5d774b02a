//! Discovery and parsing of validation and stage definition files.
//!
//! Layout under the base directory:
//!
//! ```text
//! validations/ram.toml        procedure = "playbooks/ram.yaml", [metadata] name, ...
//! stages/pre-deployment.toml  include = ["../validations/ram.toml"], [metadata] ...
//! ```
//!
//! A validation's `procedure` is resolved against the directory of its
//! definition file. Without one, the definition file itself is the
//! procedure.

use crate::core::error::CatalogError;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

const DEFAULT_NAME: &str = "Unnamed";
const DEFAULT_DESCRIPTION: &str = "No description";
const DEFAULT_PHASE: &str = "No stage";
const DEFAULT_REQUIRES_PLAN: bool = true;

/// Metadata keys lifted out into typed fields.
const RESERVED_KEYS: [&str; 4] = ["name", "description", "require_plan", "ref"];

/// A validation as written on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationDefinition {
    /// Definition file. Stage includes refer to it.
    pub path: PathBuf,
    /// Procedure handed to the task runner.
    pub procedure: PathBuf,
    pub name: String,
    pub description: String,
    pub requires_plan: bool,
    /// Optional documentation link (`ref` metadata key).
    pub reference: Option<String>,
    /// Remaining metadata, unvalidated.
    pub metadata: Vec<(String, String)>,
}

/// A stage as written on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDefinition {
    /// Definition file.
    pub path: PathBuf,
    pub name: String,
    pub description: String,
    /// Free-form phase label (`stage` metadata key).
    pub phase: String,
    /// Included validation files, relative to the stage file's directory.
    pub included_paths: Vec<PathBuf>,
}

/// Source of catalog definitions.
pub trait CatalogLoader {
    /// All validation definitions.
    fn load_validation_definitions(&self) -> Result<Vec<ValidationDefinition>, CatalogError>;

    /// All stage definitions.
    fn load_stage_definitions(&self) -> Result<Vec<StageDefinition>, CatalogError>;
}

/// Loads definitions from `<base>/validations/*.toml` and `<base>/stages/*.toml`.
#[derive(Debug, Clone)]
pub struct FsCatalogLoader {
    base_dir: PathBuf,
}

impl FsCatalogLoader {
    /// Create a loader rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn discover(&self, subdir: &str) -> Result<Vec<PathBuf>, CatalogError> {
        let pattern = self.base_dir.join(subdir).join("*.toml");
        let pattern = pattern.to_string_lossy();
        let mut paths = Vec::new();
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) => paths.push(path),
                Err(e) => {
                    return Err(CatalogError::Io {
                        path: e.path().to_path_buf(),
                        source: e.into(),
                    })
                }
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl CatalogLoader for FsCatalogLoader {
    fn load_validation_definitions(&self) -> Result<Vec<ValidationDefinition>, CatalogError> {
        self.discover("validations")?
            .into_iter()
            .map(|path| {
                let table = read_table(&path)?;
                parse_validation(path, &table)
            })
            .collect()
    }

    fn load_stage_definitions(&self) -> Result<Vec<StageDefinition>, CatalogError> {
        self.discover("stages")?
            .into_iter()
            .map(|path| {
                let table = read_table(&path)?;
                parse_stage(path, &table)
            })
            .collect()
    }
}

fn read_table(path: &Path) -> Result<Table, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse::<Table>().map_err(|e| CatalogError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn parse_error(path: &Path, message: impl Into<String>) -> CatalogError {
    CatalogError::Parse {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn metadata_table<'a>(path: &Path, table: &'a Table) -> Result<Option<&'a Table>, CatalogError> {
    match table.get("metadata") {
        None => Ok(None),
        Some(Value::Table(metadata)) => Ok(Some(metadata)),
        Some(_) => Err(parse_error(path, "'metadata' must be a table")),
    }
}

fn string_field(
    path: &Path,
    metadata: Option<&Table>,
    key: &str,
) -> Result<Option<String>, CatalogError> {
    match metadata.and_then(|m| m.get(key)) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(parse_error(path, format!("metadata '{}' must be a string", key))),
    }
}

/// Render a metadata value as text; strings are kept unquoted.
fn metadata_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn procedure_path(path: &Path, table: &Table) -> Result<PathBuf, CatalogError> {
    match table.get("procedure") {
        None => Ok(path.to_path_buf()),
        Some(Value::String(procedure)) => {
            let dir = path.parent().unwrap_or_else(|| Path::new(""));
            Ok(dir.join(procedure))
        }
        Some(_) => Err(parse_error(path, "'procedure' must be a string")),
    }
}

pub(crate) fn parse_validation(
    path: PathBuf,
    table: &Table,
) -> Result<ValidationDefinition, CatalogError> {
    let metadata = metadata_table(&path, table)?;
    let procedure = procedure_path(&path, table)?;

    let requires_plan = match metadata.and_then(|m| m.get("require_plan")) {
        None => DEFAULT_REQUIRES_PLAN,
        Some(Value::Boolean(b)) => *b,
        Some(_) => return Err(parse_error(&path, "metadata 'require_plan' must be a boolean")),
    };

    let extra = metadata
        .map(|m| {
            m.iter()
                .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), metadata_text(v)))
                .collect()
        })
        .unwrap_or_default();

    Ok(ValidationDefinition {
        name: string_field(&path, metadata, "name")?.unwrap_or_else(|| DEFAULT_NAME.to_string()),
        description: string_field(&path, metadata, "description")?
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        reference: string_field(&path, metadata, "ref")?,
        requires_plan,
        metadata: extra,
        procedure,
        path,
    })
}

pub(crate) fn parse_stage(path: PathBuf, table: &Table) -> Result<StageDefinition, CatalogError> {
    let metadata = metadata_table(&path, table)?;

    let included_paths = match table.get("include") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(PathBuf::from(s)),
                _ => Err(parse_error(&path, "'include' entries must be strings")),
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(parse_error(&path, "'include' must be an array")),
    };

    Ok(StageDefinition {
        name: string_field(&path, metadata, "name")?.unwrap_or_else(|| DEFAULT_NAME.to_string()),
        description: string_field(&path, metadata, "description")?
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        phase: string_field(&path, metadata, "stage")?.unwrap_or_else(|| DEFAULT_PHASE.to_string()),
        included_paths,
        path,
    })
}
