//! Execution service
//!
//! Runs the pipeline `lookup → validate params → check columns → invoke`
//! either on the caller's thread (`execute_now`) or on a bounded worker pool
//! (`schedule`).
//!
//! ## Worker pool
//!
//! - A semaphore sized at construction bounds concurrent invocations
//! - Each scheduled job runs its dataset loader and the pipeline inside
//!   `spawn_blocking`, so slow loaders never block the submitter
//! - A `TaskTracker` lets `shutdown(true)` drain in-flight work
//!
//! There is no cancellation point inside a handler: `shutdown(false)` stops
//! new submissions and returns, while running handlers finish on their own.

use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::error::{AnalysisError, Result};
use crate::registry::{ModuleRegistry, RegisteredModule};
use crate::requirements::check_requirements;
use crate::schema::{AnalysisContext, AnalysisResult, ExecutionRequest, Parameters};
use crate::table::Table;
use crate::validator::validate_parameters;

/// Pool size used when none is configured
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Stages one invocation moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Requested,
    Validating,
    ColumnChecking,
    Invoking,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStage::Requested => write!(f, "requested"),
            ExecutionStage::Validating => write!(f, "validating"),
            ExecutionStage::ColumnChecking => write!(f, "column_checking"),
            ExecutionStage::Invoking => write!(f, "invoking"),
            ExecutionStage::Completed => write!(f, "completed"),
            ExecutionStage::Failed => write!(f, "failed"),
        }
    }
}

/// Orchestrates validation and handler invocation
pub struct ExecutionService {
    registry: Arc<ModuleRegistry>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    max_workers: usize,
    shut_down: AtomicBool,
    // held across the shutdown check and the spawn, and while shutdown closes the tracker
    submit_lock: Mutex<()>,
}

impl ExecutionService {
    /// Create a service with a worker pool of `max_workers` slots (at least 1)
    pub fn new(registry: Arc<ModuleRegistry>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            registry,
            permits: Arc::new(Semaphore::new(max_workers)),
            tracker: TaskTracker::new(),
            max_workers,
            shut_down: AtomicBool::new(false),
            submit_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Scheduled invocations not yet finished (queued or running)
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Run the full pipeline on the caller's thread
    pub fn execute_now(
        &self,
        dataset: &Table,
        context: &AnalysisContext,
        request: &ExecutionRequest,
    ) -> Result<AnalysisResult> {
        run_pipeline(&self.registry, dataset, context, request)
    }

    /// Submit the pipeline to the worker pool.
    ///
    /// `loader` runs on the worker once a slot is free. Must be called from
    /// inside a Tokio runtime.
    pub fn schedule<L>(
        &self,
        loader: L,
        context: AnalysisContext,
        request: ExecutionRequest,
    ) -> Result<ExecutionHandle>
    where
        L: FnOnce() -> anyhow::Result<Table> + Send + 'static,
    {
        let task_id = request.task_id.clone();
        self.schedule_with(
            move || {
                let dataset = loader().map_err(|e| AnalysisError::DataLoad {
                    task_id,
                    reason: format!("{:#}", e),
                })?;
                Ok((dataset, context))
            },
            request,
        )
    }

    /// Submit the pipeline with a worker-side step that produces both the
    /// dataset and the context. Errors from `prepare` are the job's outcome.
    pub fn schedule_with<P>(&self, prepare: P, request: ExecutionRequest) -> Result<ExecutionHandle>
    where
        P: FnOnce() -> Result<(Table, AnalysisContext)> + Send + 'static,
    {
        let _submit = self.submit_lock.lock();
        if self.is_shut_down() {
            warn!(module_id = %request.module_id, "Rejected schedule after shutdown");
            return Err(AnalysisError::ServiceShutdown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| AnalysisError::Config {
            reason: "schedule() must be called from within a Tokio runtime".to_string(),
        })?;

        let module_id = request.module_id.clone();
        let task_id = request.task_id.clone();
        let registry = Arc::clone(&self.registry);
        let permits = Arc::clone(&self.permits);
        let job_module_id = module_id.clone();

        debug!(module_id = %module_id, task_id = %task_id, "Scheduling analysis");
        let join = self.tracker.spawn_on(
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| AnalysisError::ServiceShutdown)?;

                let job = tokio::task::spawn_blocking(move || {
                    let (dataset, context) = prepare()?;
                    run_pipeline(&registry, &dataset, &context, &request)
                });

                match job.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(AnalysisError::Handler {
                        module_id: job_module_id,
                        message: format!("worker failed: {}", e),
                    }),
                }
            },
            &runtime,
        );

        Ok(ExecutionHandle {
            module_id,
            task_id,
            join,
        })
    }

    /// Stop accepting scheduled work; with `wait`, drain everything in flight.
    ///
    /// Every `schedule` that returned `Ok` before this call is covered by the
    /// drain. Calling it again is harmless.
    pub async fn shutdown(&self, wait: bool) {
        {
            let _submit = self.submit_lock.lock();
            if !self.shut_down.swap(true, Ordering::SeqCst) {
                info!(in_flight = self.in_flight(), wait, "Shutting down execution service");
            }
            self.tracker.close();
        }
        if wait {
            self.tracker.wait().await;
        }
    }
}

/// Future-like handle to one scheduled invocation
#[derive(Debug)]
pub struct ExecutionHandle {
    module_id: String,
    task_id: String,
    join: JoinHandle<Result<AnalysisResult>>,
}

impl ExecutionHandle {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the invocation to finish
    pub async fn wait(self) -> Result<AnalysisResult> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AnalysisError::Handler {
                module_id: self.module_id,
                message: format!("worker failed: {}", e),
            }),
        }
    }
}

#[instrument(
    name = "analysis.execute",
    skip_all,
    fields(module_id = %request.module_id, task_id = %request.task_id)
)]
fn run_pipeline(
    registry: &ModuleRegistry,
    dataset: &Table,
    context: &AnalysisContext,
    request: &ExecutionRequest,
) -> Result<AnalysisResult> {
    debug!(stage = %ExecutionStage::Requested, rows = dataset.len());
    let module = registry.get(&request.module_id)?;

    debug!(stage = %ExecutionStage::Validating);
    let params = validate_parameters(&module.definition, &request.parameters)?;

    debug!(stage = %ExecutionStage::ColumnChecking);
    check_requirements(&module.definition, dataset)?;

    let context = if module.definition.allow_privileged_calls || context.client.is_none() {
        Cow::Borrowed(context)
    } else {
        debug!("Withholding external client from unprivileged module");
        Cow::Owned(context.without_client())
    };

    debug!(stage = %ExecutionStage::Invoking);
    invoke(&module, dataset, &params, &context)
}

fn invoke(
    module: &RegisteredModule,
    dataset: &Table,
    params: &Parameters,
    context: &AnalysisContext,
) -> Result<AnalysisResult> {
    let module_id = &module.definition.module_id;
    let _entered = context.span.as_ref().map(|span| span.enter());
    let started = Instant::now();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        module.handler.invoke(dataset, params, context)
    }));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(result)) => {
            debug!(stage = %ExecutionStage::Completed, elapsed_ms, rows = result.table.len());
            Ok(result)
        }
        Ok(Err(e)) => {
            let error = format!("{:#}", e);
            warn!(stage = %ExecutionStage::Failed, elapsed_ms, error = %error, "Module failed");
            Err(AnalysisError::handler(module_id, &e))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(stage = %ExecutionStage::Failed, elapsed_ms, panic = %message, "Module panicked");
            Err(AnalysisError::Handler {
                module_id: module_id.clone(),
                message: format!("panicked: {}", message),
            })
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExternalClient, ModuleDefinition, ParameterSpec};
    use crate::table::Cell;
    use serde_json::json;
    use std::any::Any;

    fn table_with(columns: &[&str]) -> Table {
        Table::new(columns.iter().copied()).unwrap()
    }

    fn service_with(definition: ModuleDefinition) -> ExecutionService {
        let registry = Arc::new(ModuleRegistry::new());
        registry
            .register(
                definition,
                Arc::new(
                    |table: &Table, params: &Parameters, ctx: &AnalysisContext| -> anyhow::Result<AnalysisResult> {
                        Ok(AnalysisResult::new(table.clone())
                            .with_insight(ctx.task_id.clone())
                            .with_extra("params", serde_json::Value::Object(params.clone()))
                            .with_extra("has_client", ctx.client.is_some()))
                    },
                ),
            )
            .unwrap();
        ExecutionService::new(registry, 2)
    }

    #[test]
    fn unknown_module_fails_before_anything_else() {
        let service = service_with(ModuleDefinition::new("m", "M"));
        let err = service
            .execute_now(
                &Table::default(),
                &AnalysisContext::new("1"),
                &ExecutionRequest::new("nope", "1"),
            )
            .unwrap_err();
        assert_eq!(err, AnalysisError::UnknownModule { module_id: "nope".into() });
    }

    #[test]
    fn params_are_validated_before_columns() {
        let service = service_with(
            ModuleDefinition::new("m", "M")
                .with_parameter(ParameterSpec::number("n", "N"))
                .require_columns(["latency_ms"]),
        );
        let err = service
            .execute_now(
                &table_with(&["other"]),
                &AnalysisContext::new("1"),
                &ExecutionRequest::new("m", "1"),
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingParameter { .. }));
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let service = service_with(ModuleDefinition::new("m", "M").require_columns(["latency_ms"]));
        let err = service
            .execute_now(
                &table_with(&["tokens_used"]),
                &AnalysisContext::new("1"),
                &ExecutionRequest::new("m", "1"),
            )
            .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::MissingColumns {
                module_id: "m".into(),
                columns: vec!["latency_ms".into()]
            }
        );
    }

    #[test]
    fn handler_receives_validated_params() {
        let service = service_with(
            ModuleDefinition::new("m", "M").with_parameter(ParameterSpec::number("n", "N")),
        );
        let result = service
            .execute_now(
                &Table::default(),
                &AnalysisContext::new("1"),
                &ExecutionRequest::new("m", "1").with_param("n", "2.5"),
            )
            .unwrap();
        assert_eq!(result.extra["params"], json!({"n": 2.5}));
    }

    #[test]
    fn handler_errors_and_panics_become_handler_error() {
        let registry = Arc::new(ModuleRegistry::new());
        registry
            .register(
                ModuleDefinition::new("fails", "Fails"),
                Arc::new(
                    |_: &Table, _: &Parameters, _: &AnalysisContext| -> anyhow::Result<AnalysisResult> {
                        anyhow::bail!("no data to summarise")
                    },
                ),
            )
            .unwrap();
        registry
            .register(
                ModuleDefinition::new("panics", "Panics"),
                Arc::new(
                    |_: &Table, _: &Parameters, _: &AnalysisContext| -> anyhow::Result<AnalysisResult> {
                        panic!("index out of range")
                    },
                ),
            )
            .unwrap();
        let service = ExecutionService::new(registry, 1);
        let ctx = AnalysisContext::new("1");

        let err = service
            .execute_now(&Table::default(), &ctx, &ExecutionRequest::new("fails", "1"))
            .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::Handler {
                module_id: "fails".into(),
                message: "no data to summarise".into()
            }
        );

        let err = service
            .execute_now(&Table::default(), &ctx, &ExecutionRequest::new("panics", "1"))
            .unwrap_err();
        match err {
            AnalysisError::Handler { module_id, message } => {
                assert_eq!(module_id, "panics");
                assert!(message.contains("index out of range"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    struct Client;

    impl ExternalClient for Client {
        fn name(&self) -> &str {
            "client"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn client_is_withheld_from_unprivileged_modules() {
        let ctx = AnalysisContext::new("1").with_client(Arc::new(Client));

        let service = service_with(ModuleDefinition::new("m", "M"));
        let result = service
            .execute_now(&Table::default(), &ctx, &ExecutionRequest::new("m", "1"))
            .unwrap();
        assert_eq!(result.extra["has_client"], json!(false));

        let service = service_with(ModuleDefinition::new("m", "M").allow_privileged_calls(true));
        let result = service
            .execute_now(&Table::default(), &ctx, &ExecutionRequest::new("m", "1"))
            .unwrap();
        assert_eq!(result.extra["has_client"], json!(true));
    }

    #[tokio::test]
    async fn schedule_matches_execute_now() {
        let service = service_with(ModuleDefinition::new("m", "M").require_columns(["x"]));
        let table = table_with(&["x"]).with_row(vec![Cell::Float(1.5)]).unwrap();
        let request = ExecutionRequest::new("m", "7").with_param("extra", "kept");
        let ctx = AnalysisContext::new("7");

        let direct = service.execute_now(&table, &ctx, &request).unwrap();
        let loaded = table.clone();
        let scheduled = service
            .schedule(move || Ok(loaded), ctx, request)
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(direct, scheduled);
        service.shutdown(true).await;
    }

    #[tokio::test]
    async fn loader_failure_is_a_data_load_error() {
        let service = service_with(ModuleDefinition::new("m", "M"));
        let err = service
            .schedule(
                || anyhow::bail!("results table unavailable"),
                AnalysisContext::new("3"),
                ExecutionRequest::new("m", "3"),
            )
            .unwrap()
            .wait()
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AnalysisError::DataLoad {
                task_id: "3".into(),
                reason: "results table unavailable".into()
            }
        );
        service.shutdown(true).await;
    }

    #[tokio::test]
    async fn schedule_with_surfaces_prepare_errors() {
        let service = service_with(ModuleDefinition::new("m", "M"));
        let err = service
            .schedule_with(
                || Err(AnalysisError::TaskNotFound { task_id: "9".into() }),
                ExecutionRequest::new("m", "9"),
            )
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err, AnalysisError::TaskNotFound { task_id: "9".into() });

        let result = service
            .schedule_with(
                || Ok((Table::default(), AnalysisContext::new("from-prepare"))),
                ExecutionRequest::new("m", "9"),
            )
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(result.insights, vec!["from-prepare".to_string()]);
        service.shutdown(true).await;
    }

    #[tokio::test]
    async fn schedule_after_shutdown_is_rejected() {
        let service = service_with(ModuleDefinition::new("m", "M"));
        service.shutdown(false).await;
        service.shutdown(true).await;

        let err = service
            .schedule(
                || Ok(Table::default()),
                AnalysisContext::new("1"),
                ExecutionRequest::new("m", "1"),
            )
            .unwrap_err();
        assert_eq!(err, AnalysisError::ServiceShutdown);
        assert!(service.is_shut_down());
    }

    #[test]
    fn schedule_outside_runtime_is_an_error() {
        let service = service_with(ModuleDefinition::new("m", "M"));
        let err = service
            .schedule(
                || Ok(Table::default()),
                AnalysisContext::new("1"),
                ExecutionRequest::new("m", "1"),
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Config { .. }));
    }

    #[test]
    fn pool_size_is_at_least_one() {
        let service = ExecutionService::new(Arc::new(ModuleRegistry::new()), 0);
        assert_eq!(service.max_workers(), 1);
        assert_eq!(service.in_flight(), 0);
    }
}
