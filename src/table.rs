//! Result normalization, rendering and export
//!
//! [`normalize`] turns any [`ExecutionResult`] into a [`NormalizedTable`]:
//! ordered column names plus rows holding exactly one [`Cell`] per column.
//! It is total; odd shapes degrade to positional columns instead of failing.

use crate::database::{Dialect, ExecutionResult};
use crate::value::{Record, Value, format_datetime};
use prettytable::format::consts::FORMAT_BOX_CHARS;
use prettytable::{Cell as GridCell, Row, Table};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Shown instead of an empty grid
pub const NO_RESULTS_MESSAGE: &str = "No results found.";

/// Column name used for message results
pub const MESSAGE_COLUMN: &str = "result";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Display-safe scalar
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Cell::Null => JsonValue::Null,
            Cell::Bool(b) => JsonValue::Bool(*b),
            Cell::Int(i) => JsonValue::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(f.to_string())),
            Cell::Text(s) => JsonValue::String(s.clone()),
        }
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(b),
            Value::Int(i) => Cell::Int(i),
            Value::Float(f) => Cell::Float(f),
            Value::Text(s) => Cell::Text(s),
            Value::ObjectId(oid) => Cell::Text(oid),
            Value::DateTime(dt) => Cell::Text(format_datetime(&dt)),
            nested @ (Value::Array(_) | Value::Document(_)) => Cell::Text(nested.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

/// Uniform rows-and-columns view of a result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl NormalizedTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// CSV with a header line; NULL becomes an empty field
    pub fn to_csv(&self) -> Result<String, TableError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        self.write_records(&mut writer)?;
        let data = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let path = path.as_ref();
        debug!(
            "[NormalizedTable::write_csv] Writing {} rows to {}",
            self.rows.len(),
            path.display()
        );
        let mut writer = csv::Writer::from_path(path)?;
        self.write_records(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn write_records<W: std::io::Write>(&self, writer: &mut csv::Writer<W>) -> Result<(), TableError> {
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| cell.to_string()))?;
        }
        Ok(())
    }

    /// Array of objects, keys in column order
    pub fn to_json(&self) -> JsonValue {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let object: Map<String, JsonValue> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(Cell::to_json))
                    .collect();
                JsonValue::Object(object)
            })
            .collect();
        JsonValue::Array(rows)
    }

    pub fn to_json_pretty(&self) -> Result<String, TableError> {
        Ok(serde_json::to_string_pretty(&self.to_json())?)
    }

    /// Terminal grid, optionally cut to the first `max_rows` rows
    pub fn render(&self, max_rows: Option<usize>) -> String {
        if self.is_empty() {
            return NO_RESULTS_MESSAGE.to_string();
        }

        let mut table = Table::new();
        table.set_format(*FORMAT_BOX_CHARS);
        table.set_titles(Row::new(
            self.columns.iter().map(|c| GridCell::new(c)).collect(),
        ));

        let shown = max_rows.unwrap_or(self.rows.len()).min(self.rows.len());
        for row in &self.rows[..shown] {
            table.add_row(Row::new(
                row.iter()
                    .map(|cell| match cell {
                        Cell::Int(_) | Cell::Float(_) => {
                            GridCell::new(&cell.to_string()).style_spec("r")
                        }
                        _ => GridCell::new(&cell.to_string()),
                    })
                    .collect(),
            ));
        }

        let mut out = table.to_string();
        let total = self.rows.len();
        if shown < total {
            out.push_str(&format!("({shown} of {total} rows shown)\n"));
        } else {
            out.push_str(&format!(
                "({} {})\n",
                total,
                if total == 1 { "row" } else { "rows" }
            ));
        }
        out
    }
}

/// Replace document identifiers and timestamps with their string forms,
/// recursively through nested documents and arrays
pub fn coerce_document_values(value: Value) -> Value {
    match value {
        Value::ObjectId(oid) => Value::Text(oid),
        Value::DateTime(dt) => Value::Text(format_datetime(&dt)),
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_document_values).collect()),
        Value::Document(record) => Value::Document(coerce_record(record)),
        other => other,
    }
}

fn coerce_record(record: Record) -> Record {
    record
        .into_iter()
        .map(|(key, value)| (key, coerce_document_values(value)))
        .collect()
}

/// Convert an execution result into a table
pub fn normalize(result: ExecutionResult, dialect: Dialect) -> NormalizedTable {
    let result = match (dialect, result) {
        (Dialect::Document, ExecutionResult::Records(records)) => {
            ExecutionResult::Records(records.into_iter().map(coerce_record).collect())
        }
        (Dialect::Document, ExecutionResult::Rows(rows)) => {
            ExecutionResult::Rows(rows.into_iter().map(coerce_document_values).collect())
        }
        (_, other) => other,
    };

    match result {
        ExecutionResult::Records(records) => normalize_records(records),
        ExecutionResult::Rows(rows) => normalize_rows(rows),
        ExecutionResult::Message(message) => NormalizedTable {
            columns: vec![MESSAGE_COLUMN.to_string()],
            rows: vec![vec![Cell::Text(message)]],
        },
        ExecutionResult::Empty => NormalizedTable::default(),
    }
}

fn normalize_records(records: Vec<Record>) -> NormalizedTable {
    let Some(first) = records.first() else {
        return NormalizedTable::default();
    };
    let columns: Vec<String> = first.keys().map(str::to_string).collect();
    // Records without fields carry nothing to show
    if columns.is_empty() {
        return NormalizedTable::default();
    }

    let rows = records
        .into_iter()
        .enumerate()
        .map(|(index, record)| project_record(record, &columns, index))
        .collect();

    NormalizedTable { columns, rows }
}

/// Cells of `record` in `columns` order; missing fields become NULL
fn project_record(record: Record, columns: &[String], index: usize) -> Vec<Cell> {
    let mut cells = vec![Cell::Null; columns.len()];
    for (key, value) in record {
        match columns.iter().position(|c| *c == key) {
            Some(pos) => cells[pos] = Cell::from(value),
            None => debug!(
                "[table::normalize] Dropping field '{}' of row {} not present in first row",
                key, index
            ),
        }
    }
    cells
}

enum RowShape {
    Mapping(Record),
    Positional(Vec<Value>),
}

impl RowShape {
    fn width(&self) -> usize {
        match self {
            RowShape::Mapping(record) => record.len(),
            RowShape::Positional(values) => values.len(),
        }
    }

    /// Values in row order, padded with NULL to `width`
    fn into_positional(self, width: usize) -> Vec<Cell> {
        let values: Vec<Value> = match self {
            RowShape::Mapping(record) => record.into_iter().map(|(_, v)| v).collect(),
            RowShape::Positional(values) => values,
        };
        let mut cells: Vec<Cell> = values.into_iter().take(width).map(Cell::from).collect();
        cells.resize(width, Cell::Null);
        cells
    }
}

fn row_shape(value: Value) -> RowShape {
    let mut value = value;
    loop {
        match value {
            Value::Array(mut items) if items.len() == 1 => value = items.remove(0),
            Value::Array(items) => return RowShape::Positional(items),
            Value::Document(record) => return RowShape::Mapping(record),
            scalar => return RowShape::Positional(vec![scalar]),
        }
    }
}

fn normalize_rows(rows: Vec<Value>) -> NormalizedTable {
    let shapes: Vec<RowShape> = rows.into_iter().map(row_shape).collect();

    if let Some(RowShape::Mapping(first)) = shapes.first() {
        let columns: Vec<String> = first.keys().map(str::to_string).collect();
        if columns.is_empty() {
            return NormalizedTable::default();
        }
        let width = columns.len();
        let rows = shapes
            .into_iter()
            .enumerate()
            .map(|(index, shape)| match shape {
                RowShape::Mapping(record) => project_record(record, &columns, index),
                positional => positional.into_positional(width),
            })
            .collect();
        return NormalizedTable { columns, rows };
    }

    let width = shapes.iter().map(RowShape::width).max().unwrap_or(0);
    if width == 0 {
        return NormalizedTable::default();
    }

    let columns = (1..=width).map(|i| format!("Column_{i}")).collect();
    let rows = shapes
        .into_iter()
        .map(|shape| shape.into_positional(width))
        .collect();
    NormalizedTable { columns, rows }
}
