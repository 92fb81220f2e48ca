//! Analysis Runner
//!
//! Resolves a task to its tabular results, builds a fresh context and runs
//! the requested module through the execution service.
//! `execute_module_for_task` runs on the caller's thread; `schedule_for_task`
//! performs the same task resolution on a pool worker.
//!
//! Task lookup and dataset loading are injected collaborators
//! ([`TaskLookup`], [`DatasetLoader`]); see `store` for the bundled ones.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, info_span, instrument};

use crate::error::{AnalysisError, Result};
use crate::executor::{ExecutionHandle, ExecutionService};
use crate::schema::{AnalysisContext, AnalysisResult, ColumnDescriptor, ExecutionRequest, ModuleDefinition};
use crate::table::Table;

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Lifecycle status of a prompt-testing task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A prompt-testing task as seen by the runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Resolves task identifiers to task records
pub trait TaskLookup: Send + Sync {
    /// `Ok(None)` when the task does not exist
    fn find_task(&self, task_id: &str) -> anyhow::Result<Option<TaskRecord>>;
}

/// Loads a task's results as a table
pub trait DatasetLoader: Send + Sync {
    fn load_dataset(&self, task: &TaskRecord) -> anyhow::Result<Table>;
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Transport form of an [`AnalysisResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub module_id: String,
    /// Row records; non-finite numbers are `null`
    pub data: Vec<Map<String, Value>>,
    pub column_descriptors: Vec<ColumnDescriptor>,
    pub insights: Vec<String>,
    pub usage_stats: Option<Map<String, Value>>,
    pub protocol_version: String,
    pub extra: Map<String, Value>,
}

/// Convert a result into its transport payload
pub fn serialize_result(module_id: &str, result: AnalysisResult) -> AnalysisPayload {
    AnalysisPayload {
        module_id: module_id.to_string(),
        data: result.table.to_records(),
        column_descriptors: result.column_descriptors,
        insights: result.insights,
        usage_stats: result.usage_stats,
        protocol_version: result.protocol_version,
        extra: result.extra,
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// Task-aware front door to the execution service
pub struct AnalysisRunner {
    service: Arc<ExecutionService>,
    tasks: Arc<dyn TaskLookup>,
    loader: Arc<dyn DatasetLoader>,
}

impl AnalysisRunner {
    pub fn new(
        service: Arc<ExecutionService>,
        tasks: Arc<dyn TaskLookup>,
        loader: Arc<dyn DatasetLoader>,
    ) -> Self {
        Self {
            service,
            tasks,
            loader,
        }
    }

    pub fn service(&self) -> &Arc<ExecutionService> {
        &self.service
    }

    /// Catalog of registered modules, in registration order
    pub fn catalog(&self) -> Vec<ModuleDefinition> {
        self.service.registry().list()
    }

    /// Run `request.module_id` against the results of `request.task_id`
    #[instrument(
        name = "analysis.run",
        skip(self, request),
        fields(module_id = %request.module_id, task_id = %request.task_id)
    )]
    pub fn execute_module_for_task(
        &self,
        request: &ExecutionRequest,
        user_id: Option<i64>,
    ) -> Result<AnalysisResult> {
        let (dataset, context) =
            prepare_task(self.tasks.as_ref(), self.loader.as_ref(), request, user_id)?;
        info!(rows = dataset.len(), "Running analysis module");
        self.service.execute_now(&dataset, &context, request)
    }

    /// Queue `request` on the worker pool. Task lookup, dataset loading and
    /// context building happen on the worker, with the same checks and
    /// errors as [`execute_module_for_task`](Self::execute_module_for_task).
    pub fn schedule_for_task(
        &self,
        request: &ExecutionRequest,
        user_id: Option<i64>,
    ) -> Result<ExecutionHandle> {
        let tasks = Arc::clone(&self.tasks);
        let loader = Arc::clone(&self.loader);
        let job_request = request.clone();
        self.service.schedule_with(
            move || prepare_task(tasks.as_ref(), loader.as_ref(), &job_request, user_id),
            request.clone(),
        )
    }

    /// Execute and serialize in one step
    pub fn run(&self, request: &ExecutionRequest, user_id: Option<i64>) -> Result<AnalysisPayload> {
        let result = self.execute_module_for_task(request, user_id)?;
        Ok(serialize_result(&request.module_id, result))
    }
}

/// Resolve the task, load a non-empty dataset and build its context
fn prepare_task(
    tasks: &dyn TaskLookup,
    loader: &dyn DatasetLoader,
    request: &ExecutionRequest,
    user_id: Option<i64>,
) -> Result<(Table, AnalysisContext)> {
    let task_id = request.task_id.trim();
    if task_id.is_empty() {
        return Err(AnalysisError::DataLoad {
            task_id: request.task_id.clone(),
            reason: "task identifier is empty".to_string(),
        });
    }

    let task = tasks
        .find_task(task_id)
        .map_err(|e| data_load(task_id, &e))?
        .ok_or_else(|| AnalysisError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;

    let dataset = loader
        .load_dataset(&task)
        .map_err(|e| data_load(task_id, &e))?;
    if dataset.is_empty() {
        return Err(AnalysisError::DataLoad {
            task_id: task_id.to_string(),
            reason: format!("task has no completed results (status: {})", task.status),
        });
    }

    let context = build_context(&task, request, user_id, &dataset);
    Ok((dataset, context))
}

fn data_load(task_id: &str, err: &anyhow::Error) -> AnalysisError {
    AnalysisError::DataLoad {
        task_id: task_id.to_string(),
        reason: format!("{:#}", err),
    }
}

fn build_context(
    task: &TaskRecord,
    request: &ExecutionRequest,
    user_id: Option<i64>,
    dataset: &Table,
) -> AnalysisContext {
    let mut context = AnalysisContext::new(task.task_id.clone())
        .with_user_id(user_id)
        .with_span(info_span!(
            "analysis.module",
            module_id = %request.module_id,
            task_id = %task.task_id
        ));
    context.metadata = task.metadata.clone();
    context
        .with_metadata("task_id", task.task_id.clone())
        .with_metadata("module_id", request.module_id.clone())
        .with_metadata("row_count", dataset.len())
        .with_metadata("status", task.status.to_string())
}
