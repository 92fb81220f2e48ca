//! Module handler contract
//!
//! A handler is the invocable half of a registered module. It reads the
//! dataset, the validated parameters and the context, and returns a result.
//! Any side effect goes through the context's injected client.

use crate::schema::{AnalysisContext, AnalysisResult, Parameters};
use crate::table::Table;

/// Capability interface every analysis module implements
pub trait AnalysisHandler: Send + Sync {
    fn invoke(
        &self,
        dataset: &Table,
        params: &Parameters,
        context: &AnalysisContext,
    ) -> anyhow::Result<AnalysisResult>;
}

/// Plain functions and closures are handlers too
impl<F> AnalysisHandler for F
where
    F: Fn(&Table, &Parameters, &AnalysisContext) -> anyhow::Result<AnalysisResult> + Send + Sync,
{
    fn invoke(
        &self,
        dataset: &Table,
        params: &Parameters,
        context: &AnalysisContext,
    ) -> anyhow::Result<AnalysisResult> {
        self(dataset, params, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn closures_are_handlers() {
        let handler: Arc<dyn AnalysisHandler> =
            Arc::new(|table: &Table, _: &Parameters, ctx: &AnalysisContext| -> anyhow::Result<AnalysisResult> {
                Ok(AnalysisResult::new(table.clone()).with_insight(format!("task {}", ctx.task_id)))
            });

        let result = handler
            .invoke(&Table::default(), &Parameters::new(), &AnalysisContext::new("9"))
            .unwrap();
        assert_eq!(result.insights, vec!["task 9".to_string()]);
    }
}
