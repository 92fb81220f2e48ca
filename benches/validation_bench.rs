//! Quick benchmark for the validate → check → invoke pipeline

use std::sync::Arc;
use std::time::Instant;

use analysis_kernel::{
    validate_parameters, AnalysisContext, Cell, ExecutionRequest, ExecutionService,
    ModuleDefinition, ModuleRegistry, ParameterSpec, Parameters, Table,
};
use serde_json::json;

fn main() {
    let definition = ModuleDefinition::new("bench", "Bench")
        .with_parameter(ParameterSpec::number("threshold", "Threshold"))
        .with_parameter(ParameterSpec::choice("mode", "Mode").with_choices(["fast", "slow"]))
        .with_parameter(ParameterSpec::text("label", "Label").optional())
        .with_parameter(ParameterSpec::pattern("filter", "Filter").with_default(".*"));

    let mut raw = Parameters::new();
    raw.insert("threshold".into(), json!("12.5"));
    raw.insert("mode".into(), json!("fast"));
    raw.insert("extra".into(), json!({"nested": true}));

    println!("Parameter Validation Performance Test");
    println!("=====================================\n");

    let iterations = 100_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = validate_parameters(&definition, &raw);
    }
    let elapsed = start.elapsed();
    println!("  Time for {} iterations: {:?}", iterations, elapsed);
    println!("  Per operation: {:?}\n", elapsed / iterations);

    println!("Built-in Summary Module");
    println!("=======================\n");

    let service = ExecutionService::new(Arc::new(ModuleRegistry::with_builtin_modules()), 1);
    let ctx = AnalysisContext::new("bench");
    let request = ExecutionRequest::new("latency_tokens_summary", "bench");

    for rows in [10usize, 1_000, 10_000] {
        let mut table = Table::new(["run_index", "latency_ms", "tokens_used"]).unwrap();
        for i in 0..rows {
            table
                .push_row(vec![
                    Cell::Int(i as i64),
                    Cell::Float(100.0 + (i % 97) as f64),
                    Cell::Int(40 + (i % 13) as i64),
                ])
                .unwrap();
        }

        let iterations = 200;
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = service.execute_now(&table, &ctx, &request);
        }
        let elapsed = start.elapsed();
        println!("Rows: {}", rows);
        println!("  Time for {} iterations: {:?}", iterations, elapsed);
        println!("  Per operation: {:?}\n", elapsed / iterations);
    }
}
