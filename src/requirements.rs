//! Requirement checking: does a dataset expose the columns a module needs?

use crate::error::{AnalysisError, Result};
use crate::schema::ModuleDefinition;
use crate::table::Table;

/// Required columns absent from `table`, in sorted order
pub fn missing_columns(definition: &ModuleDefinition, table: &Table) -> Vec<String> {
    definition
        .required_columns
        .iter()
        .filter(|column| !table.has_column(column))
        .cloned()
        .collect()
}

/// Fail with `MissingColumns` naming every absent column
pub fn check_requirements(definition: &ModuleDefinition, table: &Table) -> Result<()> {
    let missing = missing_columns(definition, table);
    if missing.is_empty() {
        return Ok(());
    }
    Err(AnalysisError::MissingColumns {
        module_id: definition.module_id.clone(),
        columns: missing,
    })
}
