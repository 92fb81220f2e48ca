//! Error types with fix suggestions
//!
//! Error code ranges:
//! - ANA-001-009: Registry errors
//! - ANA-010-019: Parameter validation errors
//! - ANA-020-029: Requirement errors
//! - ANA-030-039: Task / data errors
//! - ANA-040-049: Execution errors
//! - ANA-050-059: Configuration errors

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Outward error category, stable for transport layers to map to status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    Validation,
    BadRequest,
    Conflict,
    Unavailable,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::BadRequest => write!(f, "bad_request"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::Unavailable => write!(f, "unavailable"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    // ─────────────────────────────────────────────────────────────
    // Registry errors (ANA-001 to ANA-003)
    // ─────────────────────────────────────────────────────────────
    #[error("ANA-001: Module '{module_id}' is not registered")]
    UnknownModule { module_id: String },

    #[error("ANA-002: Module '{module_id}' is already registered")]
    DuplicateModule { module_id: String },

    #[error("ANA-003: Invalid module id '{module_id}' (allowed: letters, digits, '_' and '-')")]
    InvalidModuleId { module_id: String },

    // ─────────────────────────────────────────────────────────────
    // Parameter errors (ANA-010 to ANA-012)
    // ─────────────────────────────────────────────────────────────
    #[error("ANA-010: Parameter '{key}' is required by module '{module_id}'")]
    MissingParameter { module_id: String, key: String },

    #[error("ANA-011: Parameter '{key}' expects {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: String,
    },

    #[error("ANA-012: Parameter '{key}' must be one of [{choices}], got {value}")]
    InvalidChoice {
        key: String,
        value: String,
        choices: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Requirement errors (ANA-020)
    // ─────────────────────────────────────────────────────────────
    #[error("ANA-020: Module '{module_id}' requires missing columns: {}", .columns.join(", "))]
    MissingColumns {
        module_id: String,
        columns: Vec<String>,
    },

    // ─────────────────────────────────────────────────────────────
    // Task / data errors (ANA-030 to ANA-031)
    // ─────────────────────────────────────────────────────────────
    #[error("ANA-030: Task '{task_id}' not found")]
    TaskNotFound { task_id: String },

    #[error("ANA-031: Failed to load data for task '{task_id}': {reason}")]
    DataLoad { task_id: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Execution errors (ANA-040 to ANA-041)
    // ─────────────────────────────────────────────────────────────
    #[error("ANA-040: Module '{module_id}' failed: {message}")]
    Handler { module_id: String, message: String },

    #[error("ANA-041: Execution service is shut down")]
    ServiceShutdown,

    // ─────────────────────────────────────────────────────────────
    // Configuration errors (ANA-050)
    // ─────────────────────────────────────────────────────────────
    #[error("ANA-050: Configuration error: {reason}")]
    Config { reason: String },
}

impl AnalysisError {
    /// Stable error code (e.g. "ANA-020")
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::UnknownModule { .. } => "ANA-001",
            AnalysisError::DuplicateModule { .. } => "ANA-002",
            AnalysisError::InvalidModuleId { .. } => "ANA-003",
            AnalysisError::MissingParameter { .. } => "ANA-010",
            AnalysisError::TypeMismatch { .. } => "ANA-011",
            AnalysisError::InvalidChoice { .. } => "ANA-012",
            AnalysisError::MissingColumns { .. } => "ANA-020",
            AnalysisError::TaskNotFound { .. } => "ANA-030",
            AnalysisError::DataLoad { .. } => "ANA-031",
            AnalysisError::Handler { .. } => "ANA-040",
            AnalysisError::ServiceShutdown => "ANA-041",
            AnalysisError::Config { .. } => "ANA-050",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AnalysisError::UnknownModule { .. } | AnalysisError::TaskNotFound { .. } => {
                ErrorCategory::NotFound
            }
            AnalysisError::MissingParameter { .. }
            | AnalysisError::TypeMismatch { .. }
            | AnalysisError::InvalidChoice { .. } => ErrorCategory::Validation,
            AnalysisError::MissingColumns { .. }
            | AnalysisError::DataLoad { .. }
            | AnalysisError::InvalidModuleId { .. } => ErrorCategory::BadRequest,
            AnalysisError::DuplicateModule { .. } => ErrorCategory::Conflict,
            AnalysisError::ServiceShutdown => ErrorCategory::Unavailable,
            AnalysisError::Handler { .. } | AnalysisError::Config { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// True for errors raised before any handler ran
    pub fn is_validation(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::BadRequest | ErrorCategory::NotFound
        )
    }

    /// Serializable form for transport layers
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            category: self.category(),
            message: self.to_string(),
            fix: self.fix_suggestion().map(str::to_string),
        }
    }

    /// Wrap a handler failure, keeping the full cause chain
    pub(crate) fn handler(module_id: &str, err: &anyhow::Error) -> Self {
        AnalysisError::Handler {
            module_id: module_id.to_string(),
            message: format!("{:#}", err),
        }
    }
}

impl FixSuggestion for AnalysisError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            AnalysisError::UnknownModule { .. } => {
                Some("List available modules and check the module_id spelling")
            }
            AnalysisError::DuplicateModule { .. } => {
                Some("Use replace() to update an existing module, or pick a new module_id")
            }
            AnalysisError::InvalidModuleId { .. } => {
                Some("Use only ASCII letters, digits, '_' and '-' in module ids")
            }
            AnalysisError::MissingParameter { .. } => {
                Some("Add the parameter to the request's parameters map")
            }
            AnalysisError::TypeMismatch { .. } => {
                Some("Send a value of the declared type (numbers may be numeric strings)")
            }
            AnalysisError::InvalidChoice { .. } => Some("Pick one of the listed choices"),
            AnalysisError::MissingColumns { .. } => {
                Some("Run the module against a task whose results include every listed column")
            }
            AnalysisError::TaskNotFound { .. } => Some("Verify the task_id exists"),
            AnalysisError::DataLoad { .. } => {
                Some("Make sure the task has completed results before analysing it")
            }
            AnalysisError::Handler { .. } => Some("Check the module's logs for the failing step"),
            AnalysisError::ServiceShutdown => {
                Some("Create a new execution service; a shut down service accepts no work")
            }
            AnalysisError::Config { .. } => Some("Check analysis.yaml and ANALYSIS_* env vars"),
        }
    }
}

/// Transport-ready error body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}
