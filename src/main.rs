//! Analysis Kernel CLI - run analysis modules against prompt-test task results

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::future::join_all;
use serde_json::{json, Value};

use analysis_kernel::error::FixSuggestion;
use analysis_kernel::{
    serialize_result, AnalysisConfig, AnalysisError, AnalysisPayload,
    AnalysisRunner, DatasetLoader, ExecutionRequest, ExecutionService, FileTaskStore,
    ModuleRegistry, Parameters, TaskLookup,
};

#[derive(Parser)]
#[command(name = "analysis-kernel")]
#[command(about = "Analysis Kernel - run analysis modules against prompt-test results")]
#[command(version)]
struct Cli {
    /// Config file (default: ./analysis.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered analysis modules
    Modules {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// List tasks in the task directory
    Tasks {
        /// Task directory (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Run one or more modules against a task
    Run {
        /// Task identifier
        #[arg(short, long)]
        task: String,

        /// Module id (repeat to run several)
        #[arg(short, long = "module", required = true)]
        modules: Vec<String>,

        /// Parameter as key=value; values are parsed as JSON when possible
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// User id recorded in the execution context
        #[arg(short, long)]
        user: Option<i64>,

        /// Task directory (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Run on the worker pool even for a single module
        #[arg(long)]
        schedule: bool,

        /// Print payloads as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so JSON on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match AnalysisConfig::load(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Modules { json } => list_modules(json),
            Commands::Tasks { dir } => list_tasks(dir.unwrap_or(config.task_dir)),
            Commands::Run {
                task,
                modules,
                params,
                user,
                dir,
                schedule,
                json,
            } => {
                let options = RunOptions {
                    task_id: task,
                    modules,
                    parameters: params.into_iter().collect(),
                    user_id: user.or(config.default_user_id),
                    task_dir: dir.unwrap_or_else(|| config.task_dir.clone()),
                    schedule,
                    json,
                };
                run_modules(options, config.max_workers).await
            }
        },
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        report_error(&e);
        std::process::exit(1);
    }
}

fn report_error(e: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), e);
    if let Some(suggestion) = e
        .downcast_ref::<AnalysisError>()
        .and_then(|err| err.fix_suggestion())
    {
        eprintln!("  {} {}", "Fix:".yellow(), suggestion);
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("parameter key is empty in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

// ============================================================================
// COMMANDS
// ============================================================================

fn list_modules(as_json: bool) -> anyhow::Result<()> {
    let registry = ModuleRegistry::with_builtin_modules();
    let catalog = registry.list();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    for definition in catalog {
        println!(
            "{} {} {}",
            "→".cyan(),
            definition.module_id.cyan().bold(),
            format!("({})", definition.name).dimmed()
        );
        if let Some(description) = &definition.description {
            println!("    {}", description);
        }
        if !definition.required_columns.is_empty() {
            let columns: Vec<&str> = definition.required_columns.iter().map(String::as_str).collect();
            println!("    requires: {}", columns.join(", "));
        }
    }
    Ok(())
}

fn list_tasks(dir: PathBuf) -> anyhow::Result<()> {
    let store = FileTaskStore::new(&dir);
    let tasks = store.list_tasks()?;
    if tasks.is_empty() {
        eprintln!("{} No tasks in {}", "→".cyan(), dir.display());
    }
    for task_id in tasks {
        println!("{}", task_id);
    }
    Ok(())
}

struct RunOptions {
    task_id: String,
    modules: Vec<String>,
    parameters: Parameters,
    user_id: Option<i64>,
    task_dir: PathBuf,
    schedule: bool,
    json: bool,
}

impl RunOptions {
    fn request(&self, module_id: &str) -> ExecutionRequest {
        ExecutionRequest {
            module_id: module_id.to_string(),
            task_id: self.task_id.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

async fn run_modules(options: RunOptions, max_workers: usize) -> anyhow::Result<()> {
    let store = Arc::new(FileTaskStore::new(&options.task_dir));
    let registry = Arc::new(ModuleRegistry::with_builtin_modules());
    let service = Arc::new(ExecutionService::new(registry, max_workers));
    let runner = AnalysisRunner::new(
        Arc::clone(&service),
        store.clone() as Arc<dyn TaskLookup>,
        store as Arc<dyn DatasetLoader>,
    );

    if options.modules.len() == 1 && !options.schedule {
        let payload = runner.run(&options.request(&options.modules[0]), options.user_id)?;
        print_payload(&payload, options.json)?;
        return Ok(());
    }

    let outcomes = run_scheduled(&runner, &options).await;
    service.shutdown(true).await;

    let failed = outcomes.iter().filter(|(_, outcome)| outcome.is_err()).count();
    if options.json {
        let items: Vec<Value> = outcomes
            .iter()
            .map(|(module_id, outcome)| match outcome {
                Ok(payload) => serde_json::to_value(payload).unwrap_or(Value::Null),
                Err(e) => json!({ "module_id": module_id, "error": e.to_payload() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for (module_id, outcome) in &outcomes {
            match outcome {
                Ok(payload) => print_payload(payload, false)?,
                Err(e) => {
                    eprintln!("{} {}", "✗".red(), module_id.bold());
                    report_error(&anyhow::Error::new(e.clone()));
                }
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} modules failed", failed, outcomes.len()));
    }
    Ok(())
}

/// Fan every module out to the worker pool and join the outcomes in request order
async fn run_scheduled(
    runner: &AnalysisRunner,
    options: &RunOptions,
) -> Vec<(String, Result<AnalysisPayload, AnalysisError>)> {
    let pending: Vec<_> = options
        .modules
        .iter()
        .map(|module_id| {
            let handle = runner.schedule_for_task(&options.request(module_id), options.user_id);
            (module_id.clone(), handle)
        })
        .collect();

    join_all(pending.into_iter().map(|(module_id, handle)| async move {
        let outcome = match handle {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };
        let payload = outcome.map(|result| serialize_result(&module_id, result));
        (module_id, payload)
    }))
    .await
}

fn print_payload(payload: &AnalysisPayload, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(payload)?);
        return Ok(());
    }

    println!("{} {}", "→".cyan(), payload.module_id.cyan().bold());
    let columns: Vec<&str> = payload
        .column_descriptors
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    let columns: Vec<&str> = if columns.is_empty() {
        payload
            .data
            .first()
            .map(|row| row.keys().map(String::as_str).collect())
            .unwrap_or_default()
    } else {
        columns
    };

    println!("    {}", columns.join("\t").bold());
    for row in &payload.data {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| display_value(row.get(*column).unwrap_or(&Value::Null)))
            .collect();
        println!("    {}", cells.join("\t"));
    }

    if !payload.insights.is_empty() {
        println!("{}", "Insights:".cyan().bold());
        for insight in &payload.insights {
            println!("    • {}", insight);
        }
    }
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
