//! Sampling Engine: bounded random subsets of source tables.
//!
//! Sample size follows Chaudhuri, Motwani and Narasayya, "Random sampling
//! for histogram construction: how much is enough?" (SIGMOD 1998): with bin
//! error 0.5 and error probability 0.01 a sample of `300 × k` rows suffices
//! for a `k`-bucket histogram, almost independently of table size.

use crate::connector::{ColumnMeta, Connector, Row, RowEvent, Value};
use crate::error::{SbxError, SbxResult};
use crate::sql::escape::{hex_literal, quote_ident, quote_literal};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Rows per statistic-target unit.
pub const ROWS_PER_TARGET: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub enabled: bool,
    /// Histogram resolution `k`
    pub statistic_target: u64,
    /// Tables estimated above this many rows are never scanned
    pub max_total_rows: u64,
    /// Rows per `INSERT` statement
    pub batch_rows: usize,
    /// Replaces the computed `WHERE RAND() <= f LIMIT n` clause verbatim
    pub condition: Option<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            statistic_target: 100,
            max_total_rows: 9_999_999,
            batch_rows: 200,
            condition: None,
        }
    }
}

impl SamplingConfig {
    pub fn desired_rows(&self) -> u64 {
        ROWS_PER_TARGET * self.statistic_target
    }
}

/// What happened to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleOutcome {
    Inserted(u64),
    SkippedView,
    SkippedEmpty,
    SkippedTooLarge { rows: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleReport {
    pub tables: Vec<(String, SampleOutcome)>,
}

impl SampleReport {
    pub fn inserted(&self) -> u64 {
        self.tables
            .iter()
            .map(|(_, outcome)| match outcome {
                SampleOutcome::Inserted(n) => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, table: &str) -> Option<SampleOutcome> {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, outcome)| *outcome)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueClass {
    Numeric,
    Temporal,
    Binary,
    Text,
}

fn value_class(type_name: &str) -> ValueClass {
    let base = type_name
        .split([' ', '('])
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    match base.as_str() {
        "BOOLEAN" | "BOOL" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER"
        | "BIGINT" | "DECIMAL" | "NUMERIC" | "FLOAT" | "DOUBLE" | "REAL" | "YEAR" => ValueClass::Numeric,
        "DATE" | "TIME" | "DATETIME" | "TIMESTAMP" => ValueClass::Temporal,
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => ValueClass::Binary,
        _ => ValueClass::Text,
    }
}

fn is_numeric_literal(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().any(|b| b.is_ascii_digit())
        && s.bytes().all(|b| b.is_ascii_digit() || b"+-.eE".contains(&b))
        && s.parse::<f64>().is_ok()
}

/// SQL literal for one sampled cell.
pub fn value_literal(column: &ColumnMeta, value: &Value) -> String {
    let Some(bytes) = value.as_bytes() else {
        return "NULL".to_string();
    };
    let class = value_class(&column.type_name);
    if bytes.is_empty() && matches!(class, ValueClass::Numeric | ValueClass::Temporal) {
        return "NULL".to_string();
    }
    match (class, std::str::from_utf8(bytes)) {
        (ValueClass::Binary, _) | (_, Err(_)) => hex_literal(bytes),
        (ValueClass::Numeric, Ok(text)) if is_numeric_literal(text) => text.to_string(),
        (_, Ok(text)) => quote_literal(text),
    }
}

fn row_literal(columns: &[ColumnMeta], row: &Row) -> String {
    let values: Vec<String> = columns
        .iter()
        .zip(&row.values)
        .map(|(column, value)| value_literal(column, value))
        .collect();
    format!("({})", values.join(","))
}

/// 샘플링 엔진
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    config: SamplingConfig,
}

impl Sampler {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Copies a sample of each table from `source`'s schema into `target`'s.
    pub async fn sample(
        &self,
        source: &Connector,
        target: &Connector,
        tables: &[&str],
    ) -> SbxResult<SampleReport> {
        if source.database() == target.database() {
            return Err(SbxError::Config(format!(
                "refusing to sample {}/{} into itself",
                source.dsn().addr,
                source.database()
            )));
        }
        let mut report = SampleReport::default();
        for table in tables {
            let outcome = self.sample_table(source, target, table).await?;
            report.tables.push((table.to_string(), outcome));
        }
        Ok(report)
    }

    fn sampling_clause(&self, table_rows: u64) -> String {
        if let Some(condition) = &self.config.condition {
            return condition.clone();
        }
        let desired = self.config.desired_rows();
        let factor = desired as f64 / table_rows as f64;
        debug!(table_rows, desired, factor, "sampling factor");
        if factor >= 1.0 {
            format!("LIMIT {desired}")
        } else {
            format!("WHERE RAND() <= {factor:.6} LIMIT {desired}")
        }
    }

    async fn sample_table(
        &self,
        source: &Connector,
        target: &Connector,
        table: &str,
    ) -> SbxResult<SampleOutcome> {
        let status = source.show_table_status(table).await?;
        if status.is_view() {
            return Ok(SampleOutcome::SkippedView);
        }
        if status.rows == 0 {
            info!(table, "table has no data, sampling skipped");
            return Ok(SampleOutcome::SkippedEmpty);
        }
        if status.rows > self.config.max_total_rows {
            info!(table, rows = status.rows, ceiling = self.config.max_total_rows, "table above protection ceiling, sampling skipped");
            return Ok(SampleOutcome::SkippedTooLarge { rows: status.rows });
        }

        let sql = format!(
            "SELECT * FROM {}.{} {}",
            quote_ident(source.database()),
            quote_ident(table),
            self.sampling_clause(status.rows)
        );
        let inserted = self.copy_rows(source, target, table, &sql).await?;
        debug!(table, inserted, "sampling done");
        Ok(SampleOutcome::Inserted(inserted))
    }

    /// Streams `sql` from `source` and inserts the rows in batches.
    async fn copy_rows(
        &self,
        source: &Connector,
        target: &Connector,
        table: &str,
        sql: &str,
    ) -> SbxResult<u64> {
        let desired = self.config.desired_rows();
        let batch_rows = self.config.batch_rows.max(1);
        let (tx, mut rx) = mpsc::channel(batch_rows);

        let consumer = async move {
            let mut columns = Vec::new();
            let mut batch = Vec::with_capacity(batch_rows);
            let mut inserted = 0u64;
            while let Some(event) = rx.recv().await {
                match event {
                    RowEvent::Columns(c) => columns = c,
                    RowEvent::Row(row) => {
                        if inserted + batch.len() as u64 >= desired {
                            break;
                        }
                        batch.push(row_literal(&columns, &row));
                        if batch.len() >= batch_rows {
                            inserted += insert_batch(target, table, &columns, &mut batch).await?;
                        }
                    }
                }
            }
            // dropping the receiver stops the producer
            drop(rx);
            if !batch.is_empty() {
                inserted += insert_batch(target, table, &columns, &mut batch).await?;
            }
            Ok::<u64, SbxError>(inserted)
        };

        let (streamed, inserted) = tokio::join!(source.stream(sql, tx), consumer);
        let inserted = inserted?;
        streamed?;
        Ok(inserted)
    }
}

async fn insert_batch(
    target: &Connector,
    table: &str,
    columns: &[ColumnMeta],
    batch: &mut Vec<String>,
) -> SbxResult<u64> {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let sql = format!(
        "INSERT INTO {}.{} ({}) VALUES {}",
        quote_ident(target.database()),
        quote_ident(table),
        names.join(","),
        batch.join(",")
    );
    target.execute(&sql).await?;
    let count = batch.len() as u64;
    batch.clear();
    Ok(count)
}
