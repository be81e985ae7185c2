// table2sheet/src/table/mod.rs
pub mod postgres;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

use crate::errors::Result;
use crate::utils::TIMESTAMP_FORMAT;

pub use postgres::PgTableReader;

/// Largest magnitude a spreadsheet number (an IEEE double) holds exactly.
const MAX_EXACT_INTEGER: u64 = 1 << 53;

/// A scalar read from one table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept in its textual form so no precision is lost on read.
    Decimal(String),
    Text(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

impl CellValue {
    /// Converts to the value sent to the spreadsheet service.
    ///
    /// Numbers stay numbers when they survive the trip through a JSON double,
    /// NULL becomes an empty cell, and everything else is sent as text.
    pub fn to_cell(&self) -> Value {
        match self {
            CellValue::Null => Value::String(String::new()),
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int(i) if i.unsigned_abs() > MAX_EXACT_INTEGER => Value::String(i.to_string()),
            CellValue::Int(i) => Value::Number((*i).into()),
            CellValue::Float(f) => Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            CellValue::Decimal(text) => decimal_cell(text),
            CellValue::Text(text) => Value::String(text.clone()),
            CellValue::Timestamp(ts) => Value::String(ts.format(TIMESTAMP_FORMAT).to_string()),
            CellValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        }
    }
}

fn decimal_cell(text: &str) -> Value {
    // Scale padding ("19.50") is not part of the value.
    let normalized = if text.contains('.') && !text.contains(['e', 'E']) {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    };
    match normalized.parse::<f64>() {
        Ok(f) if f.is_finite() && f.to_string() == normalized => Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}

/// Full contents of a table at query time. Rows are aligned to `columns`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSnapshot {
    pub table_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TableSnapshot {
    pub fn new(table_name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        TableSnapshot {
            table_name: table_name.into(),
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Header row followed by one row per data row, ready for a values update.
    pub fn to_cells(&self) -> Vec<Vec<Value>> {
        let mut cells = Vec::with_capacity(self.rows.len() + 1);
        cells.push(self.columns.iter().cloned().map(Value::String).collect());
        cells.extend(
            self.rows
                .iter()
                .map(|row| row.iter().map(CellValue::to_cell).collect()),
        );
        cells
    }
}

/// Source side of a pass: produces a snapshot of one whole table.
#[async_trait]
pub trait TableReader: Send + Sync {
    async fn read_snapshot(&self, table_name: &str) -> Result<TableSnapshot>;
}
