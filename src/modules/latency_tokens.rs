//! Latency and token usage summary
//!
//! Reference module: one `metric | value | unit` row per statistic, a few
//! plain-language insights and bar-chart options for the front end.

use serde_json::{json, Value};

use crate::handler::AnalysisHandler;
use crate::schema::{AnalysisContext, AnalysisResult, ColumnDescriptor, ModuleDefinition, Parameters};
use crate::table::{Cell, Table, TableError};

pub const MODULE_ID: &str = "latency_tokens_summary";

const LATENCY_COLUMN: &str = "latency_ms";
const TOKENS_COLUMN: &str = "tokens_used";

pub fn definition() -> ModuleDefinition {
    ModuleDefinition::new(MODULE_ID, "Latency & Tokens Overview")
        .with_description(
            "Distribution of latency and token usage across a task's runs, for performance and cost review.",
        )
        .require_columns([LATENCY_COLUMN, TOKENS_COLUMN])
        .with_tags(["performance", "cost"])
}

/// Handler for [`MODULE_ID`]
#[derive(Debug, Default, Clone, Copy)]
pub struct LatencyTokensSummary;

impl AnalysisHandler for LatencyTokensSummary {
    fn invoke(
        &self,
        dataset: &Table,
        _params: &Parameters,
        _context: &AnalysisContext,
    ) -> anyhow::Result<AnalysisResult> {
        let summary = Summary::from_table(dataset);

        Ok(AnalysisResult::new(summary.to_table()?)
            .with_columns(column_descriptors())
            .with_insights(summary.insights())
            .with_protocol_version(definition().protocol_version)
            .with_extra("module_id", MODULE_ID)
            .with_extra("charts", Value::Array(summary.charts())))
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq)]
struct Summary {
    samples: usize,
    latency_avg: Option<f64>,
    latency_p95: Option<f64>,
    latency_max: Option<f64>,
    latency_min: Option<f64>,
    tokens_total: Option<i64>,
    tokens_avg: Option<f64>,
    tokens_p95: Option<f64>,
    tokens_max: Option<i64>,
    throughput: Option<f64>,
    tokens_per_request: Option<f64>,
}

impl Summary {
    fn from_table(dataset: &Table) -> Self {
        let latency = dataset.numeric_column(LATENCY_COLUMN);
        let tokens = dataset.numeric_column(TOKENS_COLUMN);

        let latency_values: Vec<f64> = latency.iter().flatten().copied().collect();
        let token_values: Vec<f64> = tokens.iter().flatten().copied().collect();
        let paired: Vec<(f64, f64)> = latency
            .iter()
            .zip(&tokens)
            .filter_map(|(l, t)| Some(((*l)?, (*t)?)))
            .collect();

        let mut summary = Summary {
            samples: dataset.len(),
            ..Default::default()
        };

        if !latency_values.is_empty() {
            summary.latency_avg = round2(mean(&latency_values));
            summary.latency_p95 = round2(percentile(&latency_values, 0.95));
            summary.latency_max = round2(latency_values.iter().copied().reduce(f64::max));
            summary.latency_min = round2(latency_values.iter().copied().reduce(f64::min));
        }

        if !token_values.is_empty() {
            summary.tokens_total = Some(token_values.iter().sum::<f64>() as i64);
            summary.tokens_avg = round2(mean(&token_values));
            summary.tokens_p95 = round2(percentile(&token_values, 0.95));
            summary.tokens_max = token_values.iter().copied().reduce(f64::max).map(|v| v as i64);
        }

        if !paired.is_empty() {
            let rates: Vec<f64> = paired
                .iter()
                .map(|(latency_ms, tokens)| tokens / (latency_ms / 1000.0))
                .filter(|rate| rate.is_finite())
                .collect();
            let paired_tokens: Vec<f64> = paired.iter().map(|(_, tokens)| *tokens).collect();
            summary.throughput = round2(mean(&rates));
            summary.tokens_per_request = round2(mean(&paired_tokens));
        }

        summary
    }

    fn to_table(&self) -> Result<Table, TableError> {
        let rows: [(&str, Cell, &str); 11] = [
            ("Sample count", Cell::Int(self.samples as i64), "runs"),
            ("Average latency", self.latency_avg.into(), "ms"),
            ("P95 latency", self.latency_p95.into(), "ms"),
            ("Max latency", self.latency_max.into(), "ms"),
            ("Min latency", self.latency_min.into(), "ms"),
            ("Total tokens", self.tokens_total.into(), "tokens"),
            ("Average tokens", self.tokens_avg.into(), "tokens"),
            ("P95 tokens", self.tokens_p95.into(), "tokens"),
            ("Max tokens", self.tokens_max.into(), "tokens"),
            ("Average throughput", self.throughput.into(), "tokens/s"),
            ("Average tokens per request", self.tokens_per_request.into(), "tokens"),
        ];

        let mut table = Table::new(["metric", "value", "unit"])?;
        for (metric, value, unit) in rows {
            table.push_row(vec![metric.into(), value, unit.into()])?;
        }
        Ok(table)
    }

    fn insights(&self) -> Vec<String> {
        let mut insights = Vec::new();

        match (self.latency_avg, self.latency_p95) {
            (Some(avg), Some(p95)) => insights.push(format!(
                "Average latency is about {} ms, P95 reaches {} ms.",
                avg, p95
            )),
            (Some(avg), None) => insights.push(format!("Average latency is about {} ms.", avg)),
            _ => {}
        }
        if let Some(avg) = self.tokens_avg {
            insights.push(format!("Each request uses {} tokens on average.", avg));
        }
        if let Some(rate) = self.throughput {
            insights.push(format!("Average throughput is about {} tokens/s.", rate));
        }

        if insights.is_empty() {
            insights.push("Not enough latency or token data to compute statistics.".to_string());
        }
        insights
    }

    fn charts(&self) -> Vec<Value> {
        let mut charts = Vec::new();

        let latency = [
            ("Average latency", self.latency_avg),
            ("P95 latency", self.latency_p95),
            ("Max latency", self.latency_max),
            ("Min latency", self.latency_min),
        ];
        if latency.iter().any(|(_, v)| v.is_some()) {
            charts.push(bar_chart(
                "latency_stats",
                "Latency (ms)",
                "Average, P95, max and min latency",
                "ms",
                &latency,
                "#5470C6",
            ));
        }

        let tokens = [
            ("Total tokens", self.tokens_total.map(|v| v as f64)),
            ("Average tokens", self.tokens_avg),
            ("P95 tokens", self.tokens_p95),
            ("Max tokens", self.tokens_max.map(|v| v as f64)),
            ("Average tokens per request", self.tokens_per_request),
        ];
        if tokens.iter().any(|(_, v)| v.is_some()) {
            charts.push(bar_chart(
                "token_stats",
                "Token usage",
                "Total, average, P95, max and per-request tokens",
                "tokens",
                &tokens,
                "#91CC75",
            ));
        }

        if let Some(rate) = self.throughput {
            charts.push(json!({
                "id": "throughput",
                "title": "Average throughput",
                "description": "Tokens consumed per second (tokens/s)",
                "option": {
                    "tooltip": {"trigger": "item"},
                    "xAxis": {
                        "type": "category",
                        "data": ["Average throughput"],
                        "axisTick": {"show": false}
                    },
                    "yAxis": {"type": "value", "name": "tokens/s"},
                    "series": [{
                        "type": "bar",
                        "data": [rate],
                        "itemStyle": {"color": "#FAC858"},
                        "barWidth": "35%"
                    }]
                }
            }));
        }

        charts
    }
}

/// Missing values are drawn as zero-height bars
fn bar_chart(
    id: &str,
    title: &str,
    description: &str,
    axis_name: &str,
    metrics: &[(&str, Option<f64>)],
    color: &str,
) -> Value {
    let labels: Vec<&str> = metrics.iter().map(|(label, _)| *label).collect();
    let values: Vec<f64> = metrics.iter().map(|(_, v)| v.unwrap_or(0.0)).collect();
    json!({
        "id": id,
        "title": title,
        "description": description,
        "option": {
            "tooltip": {"trigger": "axis"},
            "grid": {"left": "6%", "right": "4%", "bottom": "8%", "containLabel": true},
            "xAxis": {"type": "category", "data": labels, "axisTick": {"alignWithLabel": true}},
            "yAxis": {"type": "value", "name": axis_name},
            "series": [{
                "type": "bar",
                "data": values,
                "itemStyle": {"color": color},
                "barWidth": "45%"
            }]
        }
    })
}

fn column_descriptors() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("metric", "Metric").with_description("Name of the statistic."),
        ColumnDescriptor::new("value", "Value")
            .with_description("Value of the statistic.")
            .with_chart_kind("bar"),
        ColumnDescriptor::new("unit", "Unit").with_description("Unit the value is expressed in."),
    ]
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Linear-interpolation percentile, `q` in `[0, 1]`
fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

fn round2(value: Option<f64>) -> Option<f64> {
    value
        .filter(|v| v.is_finite())
        .map(|v| (v * 100.0).round() / 100.0)
}
