//! EXPLAIN execution and plan normalization.
//!
//! # 구조
//!
//! - [`capabilities`]: 서버 버전별 EXPLAIN 전략 테이블
//! - [`text`]: tabular / vertical 텍스트 파서
//! - [`json`]: `FORMAT=JSON` 트리 디코더 + 평탄화
//! - [`annotate`]: 임계값 기반 Plan Annotator
//!
//! Every shape ends up as the same ordered list of [`PlanRow`]s.

pub mod annotate;
pub mod json;
pub mod model;
pub mod text;

pub use annotate::{Annotator, AnnotatorConfig, Finding, FindingKind, Severity};
pub use json::{JsonPlan, PlanNode, PlanVisitor, TableAccess, parse_json};
pub use model::{ExplainInfo, PlanRow, clamp_filtered, complexity};
pub use text::{PlanShape, VERTICAL_MIN_LINES, detect_shape, parse_tabular, parse_vertical};

use crate::connector::{Connector, ResultSet, Value};
use crate::diagnostics::{DEPRECATED_EXTENDED_CODE, guarded};
use crate::error::{SbxError, SbxResult};
use crate::sql::{ParsedStatement, SqlParser, StatementKind, write_to_select};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// EXPLAIN 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainType {
    Traditional,
    #[default]
    Extended,
    Partitions,
}

/// EXPLAIN 출력 포맷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainFormat {
    #[default]
    Traditional,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    pub explain_type: ExplainType,
    /// Only honoured with [`ExplainType::Traditional`]
    pub format: ExplainFormat,
}

/// What one server generation can do with EXPLAIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplainCapabilities {
    pub min_version: u32,
    pub json_format: bool,
    /// `EXPLAIN EXTENDED` is needed to get `filtered`
    pub extended_keyword: bool,
    /// `EXPLAIN PARTITIONS` still parses
    pub partitions_keyword: bool,
    /// `EXPLAIN INSERT/UPDATE/DELETE` is accepted
    pub explain_writes: bool,
    pub optimizer_trace: bool,
}

const MYSQL_80: ExplainCapabilities = ExplainCapabilities {
    min_version: 80000,
    json_format: true,
    extended_keyword: false,
    partitions_keyword: false,
    explain_writes: true,
    optimizer_trace: true,
};

const MYSQL_56: ExplainCapabilities = ExplainCapabilities {
    min_version: 50600,
    json_format: true,
    extended_keyword: false,
    partitions_keyword: true,
    explain_writes: true,
    optimizer_trace: true,
};

const LEGACY: ExplainCapabilities = ExplainCapabilities {
    min_version: 0,
    json_format: false,
    extended_keyword: true,
    partitions_keyword: true,
    explain_writes: false,
    optimizer_trace: false,
};

/// Newest generation first.
static STRATEGIES: [ExplainCapabilities; 3] = [MYSQL_80, MYSQL_56, LEGACY];

/// Capability row for a numeric server version (`50740`, `80032`, ...).
pub fn capabilities(version: u32) -> &'static ExplainCapabilities {
    STRATEGIES
        .iter()
        .find(|c| version >= c.min_version)
        .unwrap_or(&LEGACY)
}

/// EXPLAIN statement for `sql` and the format its result will come back in.
pub fn explain_statement(sql: &str, version: u32, config: &ExplainConfig) -> (String, ExplainFormat) {
    let caps = capabilities(version);
    let sql = sql.trim().trim_end_matches(';');
    match config.explain_type {
        ExplainType::Extended if caps.extended_keyword => {
            (format!("explain extended {sql}"), ExplainFormat::Traditional)
        }
        ExplainType::Partitions if caps.partitions_keyword => {
            (format!("explain partitions {sql}"), ExplainFormat::Traditional)
        }
        ExplainType::Extended | ExplainType::Partitions => {
            (format!("explain {sql}"), ExplainFormat::Traditional)
        }
        ExplainType::Traditional => match config.format {
            ExplainFormat::Json if caps.json_format => {
                (format!("explain FORMAT=JSON {sql}"), ExplainFormat::Json)
            }
            _ => (format!("explain {sql}"), ExplainFormat::Traditional),
        },
    }
}

/// Statement that can actually be explained.
///
/// Writes pass through when the server explains them, otherwise they are
/// rewritten into an equivalent read.
pub fn explainable_sql(parsed: &ParsedStatement, writes_allowed: bool) -> SbxResult<String> {
    match parsed.kind {
        StatementKind::Select => Ok(parsed.sql.trim().to_string()),
        kind if kind.is_write() => {
            if writes_allowed {
                return Ok(parsed.sql.trim().to_string());
            }
            parsed
                .statement
                .as_ref()
                .and_then(write_to_select)
                .ok_or_else(|| {
                    SbxError::Unsupported(format!("cannot rewrite {kind:?} into a SELECT"))
                })
        }
        kind => Err(SbxError::Unsupported(format!("{kind:?} statements cannot be explained"))),
    }
}

/// Maps an EXPLAIN result set onto plan rows.
pub fn parse_explain_result(sql: &str, rs: &ResultSet, format: ExplainFormat) -> SbxResult<ExplainInfo> {
    let mut info = match format {
        ExplainFormat::Json => {
            let raw = rs
                .rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(Value::as_str)
                .ok_or_else(|| SbxError::PlanParse("empty JSON EXPLAIN result".to_string()))?;
            let plan = parse_json(&raw)?;
            let mut info = ExplainInfo::new(sql, format, plan.rows());
            info.messages = plan.messages();
            info.query_cost = plan.query_cost();
            info
        }
        ExplainFormat::Traditional => {
            let mut rows = Vec::with_capacity(rs.rows.len());
            for row in &rs.rows {
                let mut plan_row = PlanRow::default();
                for (column, value) in rs.columns.iter().zip(&row.values) {
                    let text = if value.is_null() { "NULL".to_string() } else { value.to_text() };
                    plan_row.set_field(&column.name, &text)?;
                }
                rows.push(plan_row.finish());
            }
            ExplainInfo::new(sql, format, rows)
        }
    };

    info.warnings = rs
        .diagnostics
        .warnings
        .iter()
        .filter(|w| w.code != DEPRECATED_EXTENDED_CODE)
        .cloned()
        .collect();
    if let Some(cost) = rs.diagnostics.last_query_cost {
        info.query_cost = Some(cost);
    }
    Ok(info)
}

/// Plan rows from pasted EXPLAIN output; the shape is detected unless declared.
pub fn parse_plan(raw: &str, declared: Option<PlanShape>) -> SbxResult<Vec<PlanRow>> {
    let shape = match declared {
        Some(shape) => shape,
        None => detect_shape(raw)?,
    };
    debug!(?shape, "parse plan");
    match shape {
        PlanShape::Tabular => parse_tabular(raw),
        PlanShape::Vertical => parse_vertical(raw),
        PlanShape::Json => Ok(parse_json(raw)?.rows()),
    }
}

/// [`parse_plan`] wrapped as an [`ExplainInfo`].
pub fn parse_explain_text(raw: &str) -> SbxResult<ExplainInfo> {
    let shape = detect_shape(raw)?;
    if shape == PlanShape::Json {
        let plan = parse_json(raw)?;
        let mut info = ExplainInfo::new("", ExplainFormat::Json, plan.rows());
        info.messages = plan.messages();
        info.query_cost = plan.query_cost();
        return Ok(info);
    }
    let rows = parse_plan(raw, Some(shape))?;
    Ok(ExplainInfo::new("", ExplainFormat::Traditional, rows))
}

impl Connector {
    /// Whether the server explains writes directly.
    ///
    /// `read_only` / `super_read_only` block it; an unreadable variable is
    /// taken as read-only so the statement gets rewritten.
    pub async fn explain_writes_allowed(&self, version: u32) -> bool {
        if !capabilities(version).explain_writes {
            return false;
        }
        let read_only = match self.single_int_value("read_only").await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "read_only unavailable");
                return false;
            }
        };
        // community 5.6 has no super_read_only
        let super_read_only = self.single_int_value("super_read_only").await.unwrap_or(read_only);
        read_only == 0 && super_read_only == 0
    }

    /// Runs EXPLAIN for `sql` and normalizes the result.
    pub async fn explain(&self, sql: &str, config: &ExplainConfig) -> SbxResult<ExplainInfo> {
        guarded(sql, async {
            let version = self.version().await?;
            let parsed = SqlParser::new().analyze(sql)?;
            let writes_allowed = parsed.kind.is_write() && self.explain_writes_allowed(version).await;
            let target = explainable_sql(&parsed, writes_allowed)?;
            let (statement, format) = explain_statement(&target, version, config);
            debug!(database = %self.database(), %statement, "explain");
            let rs = self.query(&statement).await?;
            parse_explain_result(&target, &rs, format)
        })
        .await
    }
}
