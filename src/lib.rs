//! Analysis Kernel - module registry and execution kernel for prompt-test analysis

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod modules;
pub mod registry;
pub mod requirements;
pub mod runner;
pub mod schema;
pub mod store;
pub mod table;
pub mod validator;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, ErrorCategory, ErrorPayload, FixSuggestion};
pub use executor::{ExecutionHandle, ExecutionService};
pub use handler::AnalysisHandler;
pub use registry::{ModuleRegistry, RegisteredModule};
pub use requirements::check_requirements;
pub use runner::{
    serialize_result, AnalysisPayload, AnalysisRunner, DatasetLoader, TaskLookup, TaskRecord,
    TaskStatus,
};
pub use schema::{
    AnalysisContext, AnalysisResult, ColumnDescriptor, ExecutionRequest, ExternalClient,
    ModuleDefinition, ParameterKind, ParameterSpec, Parameters,
};
pub use store::{FileTaskStore, MemoryTaskStore};
pub use table::{Cell, Table};
pub use validator::validate_parameters;
