//! Tabular dataset shared by every analysis module
//!
//! A `Table` is an ordered list of column names plus row-major cells.
//! Cells keep raw floats (including NaN/inf) so modules can compute freely;
//! conversion to transport records is where non-finite values become `null`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Convert a JSON value into a cell.
    ///
    /// Arrays and objects have no tabular representation and are kept as
    /// their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    /// Convert to a JSON value, mapping NaN and infinities to `null`
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Text(s) => Value::String(s.clone()),
        }
    }

    /// Lenient numeric view: numbers and numeric strings, finite only
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Cell::Int(i) => *i as f64,
            Cell::Float(f) => *f,
            Cell::Text(s) => s.trim().parse::<f64>().ok()?,
            Cell::Null | Cell::Bool(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("Row has {actual} cells but the table has {expected} columns")]
    RowArity { expected: usize, actual: usize },

    #[error("Duplicate column name '{0}'")]
    DuplicateColumn(String),
}

/// Ordered, row-major table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

/// Unchecked wire form; every row goes back through `push_row`
#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Cell>>,
}

impl TryFrom<RawTable> for Table {
    type Error = TableError;

    fn try_from(raw: RawTable) -> Result<Self, TableError> {
        let mut table = Table::new(raw.columns)?;
        for row in raw.rows {
            table.push_row(row)?;
        }
        Ok(table)
    }
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for column in columns {
            let column = column.into();
            if names.contains(&column) {
                return Err(TableError::DuplicateColumn(column));
            }
            names.push(column);
        }
        Ok(Self {
            columns: names,
            rows: Vec::new(),
        })
    }

    /// Build a table from JSON object records.
    ///
    /// `columns` fixes the column order; when empty, columns are collected
    /// from the records in first-seen order. Keys a record lacks become `Null`.
    pub fn from_records(columns: &[String], records: &[Map<String, Value>]) -> Result<Self, TableError> {
        let mut table = if columns.is_empty() {
            let mut seen: Vec<String> = Vec::new();
            for record in records {
                for key in record.keys() {
                    if !seen.iter().any(|c| c == key) {
                        seen.push(key.clone());
                    }
                }
            }
            Self::new(seen)?
        } else {
            Self::new(columns.iter().cloned())?
        };

        for record in records {
            let row = table
                .columns
                .iter()
                .map(|column| record.get(column).map(Cell::from_json).unwrap_or(Cell::Null))
                .collect();
            table.rows.push(row);
        }
        Ok(table)
    }

    /// Append a row; its arity must match the column count
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowArity {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Builder form of [`push_row`](Self::push_row)
    pub fn with_row(mut self, row: Vec<Cell>) -> Result<Self, TableError> {
        self.push_row(row)?;
        Ok(self)
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate one column's cells, or `None` if the column does not exist
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Cell> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Numeric view of a column, one entry per row.
    ///
    /// Unparseable and non-finite cells become `None`. A missing column yields
    /// all `None`.
    pub fn numeric_column(&self, name: &str) -> Vec<Option<f64>> {
        match self.column(name) {
            Some(cells) => cells.map(Cell::as_f64).collect(),
            None => vec![None; self.rows.len()],
        }
    }

    /// Look up the first row whose `key_column` cell is the text `key`
    pub fn lookup(&self, key_column: &str, key: &str, value_column: &str) -> Option<&Cell> {
        let key_idx = self.column_index(key_column)?;
        let value_idx = self.column_index(value_column)?;
        self.rows
            .iter()
            .find(|row| row[key_idx].as_str() == Some(key))
            .map(|row| &row[value_idx])
    }

    /// Convert rows into ordered JSON records with non-finite floats as `null`
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| (column.clone(), cell.to_json()))
                    .collect()
            })
            .collect()
    }
}
