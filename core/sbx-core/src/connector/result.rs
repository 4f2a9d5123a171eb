//! Result sets as seen through the text protocol.
//!
//! Every cell is kept as the raw bytes the server sent so that sampling can
//! re-emit values without a lossy round trip through Rust types.

use crate::diagnostics::SessionDiagnostics;
use serde::Serialize;
use std::borrow::Cow;

/// 컬럼 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Server type name as reported by the driver (`INT`, `VARCHAR`, `DATETIME`, ...)
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Value {
    Null,
    Bytes(Vec<u8>),
}

impl Value {
    pub fn text(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Null => None,
            Value::Bytes(b) => Some(b),
        }
    }

    /// Lossy UTF-8 view; `None` for SQL NULL.
    pub fn as_str(&self) -> Option<Cow<'_, str>> {
        self.as_bytes().map(String::from_utf8_lossy)
    }

    /// Text form with NULL rendered as the empty string.
    pub fn to_text(&self) -> String {
        self.as_str().map(Cow::into_owned).unwrap_or_default()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rows of one statement plus the diagnostics captured on the same session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub diagnostics: SessionDiagnostics,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            diagnostics: SessionDiagnostics::default(),
        }
    }

    /// Builds a text-only result set; `None` cells become SQL NULL.
    ///
    /// ```rust
    /// use sbx_core::connector::ResultSet;
    ///
    /// let rs = ResultSet::from_text(&["Variable_name", "Value"], &[&[Some("version"), Some("8.0.32")]]);
    /// assert_eq!(rs.text(0, "value").as_deref(), Some("8.0.32"));
    /// ```
    pub fn from_text(columns: &[&str], rows: &[&[Option<&str>]]) -> Self {
        let columns = columns
            .iter()
            .map(|name| ColumnMeta::new(*name, "VARCHAR"))
            .collect();
        let rows = rows
            .iter()
            .map(|cells| {
                Row::new(
                    cells
                        .iter()
                        .map(|cell| cell.map_or(Value::Null, Value::text))
                        .collect(),
                )
            })
            .collect();
        Self::new(columns, rows)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Text of a cell, `None` when the row, the column or the value is missing.
    pub fn text(&self, row: usize, column: &str) -> Option<String> {
        self.value(row, column)
            .and_then(|v| v.as_str().map(Cow::into_owned))
    }

    /// First cell of the first row.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first()?.get(0)
    }
}
