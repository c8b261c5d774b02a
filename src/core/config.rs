//! Engine configuration.
//!
//! Configuration is read from a TOML file; every field has a default so a
//! partial file (or no file at all) is valid.

use crate::core::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `validations/` and `stages/`.
    pub base_dir: PathBuf,
    /// JSON snapshot file for results. `None` keeps results in memory only.
    pub results_path: Option<PathBuf>,
    /// How validation procedures are executed.
    pub runner: RunnerConfig,
}

/// Settings for the command-based task runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Program to invoke.
    pub program: String,
    /// Arguments placed before the procedure path.
    pub args: Vec<String>,
    /// Subject name the outcome is reported under.
    pub subject: String,
    /// How often the child process is polled for exit or cancellation.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/usr/share/vigil"),
            results_path: None,
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "ansible-playbook".to_string(),
            args: vec!["-i".to_string(), "hosts".to_string()],
            subject: "localhost".to_string(),
            poll_interval_ms: 100,
        }
    }
}

impl RunnerConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|message| CatalogError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Set the definitions directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Persist results to a JSON snapshot file.
    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = Some(path.into());
        self
    }

    /// Set the runner program and its leading arguments.
    pub fn with_runner_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.runner.program = program.into();
        self.runner.args = args;
        self
    }
}
