//! SHOW-family helpers and server introspection.

use super::Connector;
use super::result::{ResultSet, Value};
use crate::error::{SbxError, SbxResult};
use crate::meta::Column;
use crate::sql::escape::{quote_ident, quote_literal};
use serde::Serialize;
use tracing::{debug, warn};

/// Row of `SHOW TABLE STATUS`. Never cached; it changes while DDL is mirrored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableStatus {
    pub name: String,
    pub engine: String,
    pub row_format: String,
    /// Estimated row count
    pub rows: u64,
    pub avg_row_length: u64,
    pub data_length: u64,
    pub index_length: u64,
    pub auto_increment: Option<u64>,
    pub collation: String,
    /// `VIEW` for views
    pub comment: String,
}

impl TableStatus {
    fn from_row(rs: &ResultSet, row: usize) -> Self {
        let text = |col: &str| rs.text(row, col).unwrap_or_default();
        let num = |col: &str| rs.value(row, col).and_then(Value::as_u64);
        Self {
            name: text("Name"),
            engine: text("Engine"),
            row_format: text("Row_format"),
            rows: num("Rows").unwrap_or(0),
            avg_row_length: num("Avg_row_length").unwrap_or(0),
            data_length: num("Data_length").unwrap_or(0),
            index_length: num("Index_length").unwrap_or(0),
            auto_increment: num("Auto_increment"),
            collation: text("Collation"),
            comment: text("Comment"),
        }
    }

    pub fn is_view(&self) -> bool {
        self.comment.trim().eq_ignore_ascii_case("VIEW")
    }
}

/// `8.0.32-log` → `80032`, `5.7.40` → `50740`.
pub fn parse_version(raw: &str) -> Option<u32> {
    let base = raw.trim().split('-').next()?;
    let mut parts = base.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    let patch: u32 = parts
        .next()
        .map(|p| p.chars().take_while(char::is_ascii_digit).collect::<String>())
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    Some(major * 10000 + minor * 100 + patch)
}

/// Drops foreign-key `CONSTRAINT` lines and repairs the dangling comma.
pub fn strip_constraints(ddl: &str) -> String {
    let mut kept: Vec<&str> = ddl
        .lines()
        .filter(|line| !line.trim_start().starts_with("CONSTRAINT"))
        .collect();

    for i in 1..kept.len() {
        if kept[i].trim_start().starts_with(')') {
            if let Some(stripped) = kept[i - 1].trim_end().strip_suffix(',') {
                kept[i - 1] = stripped;
            }
        }
    }
    kept.join("\n")
}

impl Connector {
    /// `select @@version` as a comparable number.
    pub async fn version(&self) -> SbxResult<u32> {
        let rs = self.execute("select @@version").await?;
        let raw = rs.scalar().map(Value::to_text).unwrap_or_default();
        parse_version(&raw).ok_or_else(|| SbxError::Driver(format!("unparsable server version '{raw}'")))
    }

    /// `select @@name` as an integer.
    pub async fn single_int_value(&self, name: &str) -> SbxResult<i64> {
        let rs = self.execute(&format!("select @@{name}")).await?;
        rs.scalar()
            .and_then(Value::as_i64)
            .ok_or_else(|| SbxError::Driver(format!("@@{name} is not an integer")))
    }

    pub async fn show_table_status(&self, table: &str) -> SbxResult<TableStatus> {
        let sql = format!(
            "show table status from {} where name = {}",
            quote_ident(self.database()),
            quote_literal(table)
        );
        let rs = self.execute(&sql).await?;
        if rs.is_empty() {
            return Err(SbxError::Driver(format!(
                "table {}.{} not found",
                self.database(),
                table
            )));
        }
        Ok(TableStatus::from_row(&rs, 0))
    }

    pub async fn is_view(&self, table: &str) -> SbxResult<bool> {
        Ok(self.show_table_status(table).await?.is_view())
    }

    async fn show_create(&self, what: &str, name: &str) -> SbxResult<String> {
        let rs = self.execute(&format!("show create {what} {name}")).await?;
        rs.rows
            .first()
            .and_then(|row| row.get(1))
            .and_then(Value::as_str)
            .map(|ddl| ddl.into_owned())
            .ok_or_else(|| SbxError::Driver(format!("show create {what} {name} returned nothing")))
    }

    /// Current DDL of a table (or view) with foreign keys removed.
    pub async fn show_create_table(&self, table: &str) -> SbxResult<String> {
        let name = format!("{}.{}", quote_ident(self.database()), quote_ident(table));
        let ddl = self.show_create("table", &name).await?;
        Ok(strip_constraints(&ddl))
    }

    pub async fn show_create_database(&self, database: &str) -> SbxResult<String> {
        self.show_create("database", &quote_ident(database)).await
    }

    /// `SHOW FULL COLUMNS` mapped onto the column model.
    pub async fn show_columns(&self, table: &str) -> SbxResult<Vec<Column>> {
        let sql = format!(
            "show full columns from {}.{}",
            quote_ident(self.database()),
            quote_ident(table)
        );
        let rs = self.execute(&sql).await?;
        let columns = (0..rs.rows.len())
            .map(|row| {
                let text = |col: &str| rs.text(row, col).unwrap_or_default();
                let collation = text("Collation");
                Column {
                    name: text("Field"),
                    database: self.database().to_string(),
                    table: table.to_string(),
                    data_type: text("Type"),
                    character_set: Column::charset_of_collation(&collation),
                    collation,
                    nullable: text("Null").eq_ignore_ascii_case("YES"),
                    key: text("Key"),
                    default: rs.text(row, "Default"),
                    extra: text("Extra"),
                    comment: text("Comment"),
                    cardinality: None,
                }
            })
            .collect();
        Ok(columns)
    }

    /// Fraction of distinct values in `column`, in `[0, 1]`.
    ///
    /// Empty tables and views answer 1.0; tables above `max_total_rows` answer
    /// 0.5 without scanning; failures answer 0.0.
    pub async fn column_cardinality(&self, table: &str, column: &str, max_total_rows: u64) -> f64 {
        let status = match self.show_table_status(table).await {
            Ok(status) => status,
            Err(e) => {
                warn!(table, error = %e, "cardinality: table status unavailable");
                return 0.0;
            }
        };
        if status.is_view() || status.rows == 0 {
            return 1.0;
        }
        if status.rows > max_total_rows {
            debug!(table, rows = status.rows, "cardinality: table above protection ceiling");
            return 0.5;
        }

        let sql = format!(
            "select count(distinct {}) from {}.{}",
            quote_ident(column),
            quote_ident(self.database()),
            quote_ident(table)
        );
        match self.execute(&sql).await {
            Ok(rs) => {
                let distinct = rs.scalar().and_then(Value::as_f64).unwrap_or(0.0);
                (distinct / status.rows as f64).min(1.0)
            }
            Err(e) => {
                warn!(table, column, error = %e, "cardinality: count distinct failed");
                0.0
            }
        }
    }
}
