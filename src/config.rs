//! Kernel configuration
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`ANALYSIS_MAX_WORKERS`, `ANALYSIS_TASK_DIR`)
//! 2. Config file (`--config PATH`, else `./analysis.yaml` when present)
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::executor::DEFAULT_MAX_WORKERS;

/// Config file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "analysis.yaml";

pub const ENV_MAX_WORKERS: &str = "ANALYSIS_MAX_WORKERS";
pub const ENV_TASK_DIR: &str = "ANALYSIS_TASK_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Worker pool size for scheduled executions
    pub max_workers: usize,

    /// Directory holding task files
    pub task_dir: PathBuf,

    /// User id attached to contexts when the caller gives none
    pub default_user_id: Option<i64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            task_dir: PathBuf::from("tasks"),
            default_user_id: None,
        }
    }
}

impl AnalysisConfig {
    /// Defaults, then the config file, then the environment.
    ///
    /// An explicit `path` must exist; the implicit `analysis.yaml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let implicit = Path::new(DEFAULT_CONFIG_FILE);
                if implicit.is_file() {
                    Self::from_file(implicit)?
                } else {
                    Self::default()
                }
            }
        };
        config.with_env()?.validated()
    }

    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AnalysisError::Config {
            reason: format!("Failed to read config file {:?}: {}", path, e),
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            AnalysisError::Config { reason } => AnalysisError::Config {
                reason: format!("{} ({:?})", reason, path),
            },
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // an empty document parses as null
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| AnalysisError::Config {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Merge process environment overrides
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Merge overrides from an arbitrary variable source
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_WORKERS).filter(|v| !v.trim().is_empty()) {
            self.max_workers = raw.trim().parse().map_err(|_| AnalysisError::Config {
                reason: format!("{} must be a positive integer, got '{}'", ENV_MAX_WORKERS, raw),
            })?;
        }
        if let Some(dir) = lookup(ENV_TASK_DIR).filter(|v| !v.trim().is_empty()) {
            self.task_dir = PathBuf::from(dir);
        }
        Ok(self)
    }

    pub fn validated(self) -> Result<Self> {
        if self.max_workers == 0 {
            return Err(AnalysisError::Config {
                reason: "max_workers must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}
