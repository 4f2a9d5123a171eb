use super::ExplainFormat;
use crate::diagnostics::Warning;
use crate::error::{SbxError, SbxResult};
use serde::Serialize;

/// Canonical plan row shared by every EXPLAIN shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRow {
    /// `None` for rows such as `UNION RESULT`
    pub id: Option<u32>,
    pub select_type: String,
    pub table: String,
    pub partitions: String,
    pub access_type: String,
    pub possible_keys: Vec<String>,
    pub key: String,
    pub key_len: String,
    pub r#ref: Vec<String>,
    pub rows: u64,
    /// Percentage in `[0, 100]`
    pub filtered: f64,
    /// Complexity class derived from `access_type`
    pub scalability: String,
    pub extra: String,
}

impl Default for PlanRow {
    fn default() -> Self {
        Self {
            id: None,
            select_type: String::new(),
            table: String::new(),
            partitions: "NULL".to_string(),
            access_type: String::new(),
            possible_keys: Vec::new(),
            key: String::new(),
            key_len: String::new(),
            r#ref: Vec::new(),
            rows: 0,
            filtered: 0.0,
            scalability: String::new(),
            extra: String::new(),
        }
    }
}

/// Empty or missing text fields render as `NULL`, as the server does.
pub(crate) fn null_if_empty(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        "NULL".to_string()
    } else {
        value.to_string()
    }
}

fn list(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("NULL") {
        return Vec::new();
    }
    value.split(',').map(|s| s.trim().to_string()).collect()
}

/// Clamps a server `filtered` value into `[0, 100]`; NaN becomes 0.
pub fn clamp_filtered(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Fixed access-type → complexity lookup.
pub fn complexity(access_type: &str) -> &'static str {
    match access_type {
        "ALL" | "index" => "O(n)",
        "range" | "index_subquery" | "unique_subquery" | "index_merge" | "ref_or_null"
        | "fulltext" => "O(log n)+",
        "ref" | "eq_ref" => "O(log n)",
        "const" | "system" => "O(1)",
        _ => "",
    }
}

impl PlanRow {
    /// Assigns one textual field by its EXPLAIN column name (case-insensitive).
    /// Unknown names are ignored.
    pub fn set_field(&mut self, name: &str, value: &str) -> SbxResult<()> {
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "id" => {
                self.id = if value.is_empty() || value.eq_ignore_ascii_case("NULL") {
                    None
                } else {
                    Some(value.parse().map_err(|_| {
                        SbxError::PlanParse(format!("bad id '{value}'"))
                    })?)
                }
            }
            "select_type" => self.select_type = value.to_string(),
            "table" => self.table = null_if_empty(value),
            "partitions" => self.partitions = null_if_empty(value),
            "type" => self.access_type = null_if_empty(value),
            "possible_keys" => self.possible_keys = list(value),
            "key" => self.key = null_if_empty(value),
            "key_len" => self.key_len = null_if_empty(value),
            "ref" => self.r#ref = list(value),
            "rows" => {
                self.rows = if value.is_empty() || value.eq_ignore_ascii_case("NULL") {
                    0
                } else {
                    value
                        .parse()
                        .map_err(|_| SbxError::PlanParse(format!("bad rows '{value}'")))?
                }
            }
            "filtered" => {
                let raw = if value.is_empty() || value.eq_ignore_ascii_case("NULL") {
                    0.0
                } else {
                    value
                        .parse()
                        .map_err(|_| SbxError::PlanParse(format!("bad filtered '{value}'")))?
                };
                self.filtered = clamp_filtered(raw);
            }
            "extra" => self.extra = null_if_empty(value),
            _ => {}
        }
        Ok(())
    }

    /// Derives the complexity class and fills unset text defaults.
    pub fn finish(mut self) -> Self {
        if self.access_type.is_empty() {
            self.access_type = "NULL".to_string();
        }
        if self.table.is_empty() {
            self.table = "NULL".to_string();
        }
        if self.key.is_empty() {
            self.key = "NULL".to_string();
        }
        if self.extra.is_empty() {
            self.extra = "NULL".to_string();
        }
        self.scalability = complexity(&self.access_type).to_string();
        self
    }

    /// Individual `Extra` items: `Using where; Using index` → two items.
    pub fn extra_items(&self) -> impl Iterator<Item = &str> {
        self.extra
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "NULL")
    }
}

/// Normalized result of one EXPLAIN execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainInfo {
    /// Statement that was explained (after any DML rewrite)
    pub sql: String,
    pub format: ExplainFormat,
    pub rows: Vec<PlanRow>,
    /// Query-block messages of JSON plans (`Impossible WHERE`, ...)
    pub messages: Vec<String>,
    pub warnings: Vec<Warning>,
    pub query_cost: Option<f64>,
}

impl ExplainInfo {
    pub fn new(sql: &str, format: ExplainFormat, rows: Vec<PlanRow>) -> Self {
        Self {
            sql: sql.to_string(),
            format,
            rows,
            messages: Vec::new(),
            warnings: Vec::new(),
            query_cost: None,
        }
    }
}
