//! Plan Annotator: thresholds and lookup tables over normalized plans.
//!
//! Pure: the same plan, diagnostics and configuration always produce the
//! same findings in the same order.

use super::model::{ExplainInfo, PlanRow};
use crate::diagnostics::SessionDiagnostics;
use crate::error::SbxError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Annotator thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    pub max_rows: u64,
    /// Percentage
    pub max_filtered: f64,
    pub max_cost: f64,
    pub warn_access_types: Vec<String>,
    pub warn_extra: Vec<String>,
    pub warn_scalability: Vec<String>,
    pub warn_select_types: Vec<String>,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            max_filtered: 100.0,
            max_cost: 9_999.0,
            warn_access_types: vec!["ALL".to_string()],
            warn_extra: vec!["Using temporary".to_string(), "Using filesort".to_string()],
            warn_scalability: vec!["O(n)".to_string()],
            warn_select_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    SelectType,
    AccessType,
    Extra,
    Rows,
    Filtered,
    Scalability,
    Cost,
    Message,
    ServerWarning,
    SandboxDdl,
    Trace,
}

/// One notable fact about a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    /// Key that matched: access type, extra item, table name, ...
    pub subject: String,
    pub message: String,
    pub severity: Severity,
}

impl Finding {
    fn new(kind: FindingKind, subject: &str, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind,
            subject: subject.to_string(),
            message: message.into(),
            severity,
        }
    }

    /// Builder `LastError` as a finding; `None` for errors that are not DDL conflicts.
    pub fn from_sandbox_error(error: &SbxError) -> Option<Self> {
        match error {
            SbxError::SandboxDdl { sql, message } => Some(Finding::new(
                FindingKind::SandboxDdl,
                sql,
                format!("statement fails against the mirrored schema: {message}"),
                Severity::Warning,
            )),
            _ => None,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

const SELECT_TYPES: &[(&str, &str)] = &[
    ("SIMPLE", "Simple SELECT without UNION or subqueries."),
    ("PRIMARY", "Outermost SELECT."),
    ("UNION", "Second or later SELECT in a UNION, independent of the outer query."),
    ("DEPENDENT UNION", "Second or later SELECT in a UNION, dependent on the outer query."),
    ("UNION RESULT", "Result set of a UNION."),
    ("SUBQUERY", "First SELECT in a subquery, independent of the outer query."),
    ("DEPENDENT SUBQUERY", "First SELECT in a subquery, re-evaluated for each outer row."),
    ("DERIVED", "Subquery in FROM; its result is materialized into a temporary table."),
    ("MATERIALIZED", "Materialized subquery."),
    ("UNCACHEABLE SUBQUERY", "Subquery whose result cannot be cached and is re-evaluated for each outer row."),
    ("UNCACHEABLE UNION", "Second or later SELECT in a UNION that belongs to an uncacheable subquery."),
];

const ACCESS_TYPES: &[(&str, &str)] = &[
    ("system", "Special case of const: the table has exactly one row."),
    ("const", "At most one matching row, read once through a PRIMARY KEY or UNIQUE lookup on constants."),
    ("eq_ref", "One row per combination of previous tables, through a full PRIMARY KEY or UNIQUE NOT NULL index."),
    ("ref", "All rows with matching index values are read for each combination of previous tables."),
    ("fulltext", "Join performed through a FULLTEXT index."),
    ("ref_or_null", "Like ref, plus an extra search for rows containing NULL."),
    ("index_merge", "Index Merge optimization: several indexes are scanned and their results merged."),
    ("unique_subquery", "IN subquery replaced by a primary key lookup function."),
    ("index_subquery", "IN subquery replaced by a non-unique index lookup."),
    ("range", "Only rows in a given range are retrieved, using an index to select them."),
    ("index", "Full scan in index order; avoids sorting but still reads every entry."),
    ("ALL", "Full table scan for each combination of previous tables."),
];

const EXTRA_ITEMS: &[(&str, &str)] = &[
    ("Using temporary", "A temporary table is created to hold the result, typically for ORDER BY or GROUP BY."),
    ("Using filesort", "An extra sorting pass is needed; rows cannot be read in index order."),
    ("Using index condition", "Index Condition Pushdown: index tuples are filtered before full rows are read."),
    ("Range checked for each record", "No good index was found, but some index may be usable once values from previous tables are known."),
    ("Using where with pushed condition", "Condition pushed down to the NDB data nodes."),
    ("Using MRR", "Rows are read using the Multi-Range Read optimization."),
    ("Skip_open_table", "Table files do not need to be opened."),
    ("Open_frm_only", "Only the data dictionary needs to be read."),
    ("Open_full_table", "Unoptimized lookup: table files must be opened."),
    ("Scanned", "Directory scans performed for an INFORMATION_SCHEMA query."),
    ("Using index for group-by", "All GROUP BY or DISTINCT columns are retrieved from the index alone."),
    ("Start temporary", "Start of the temporary table for the semi-join Duplicate Weedout strategy."),
    ("End temporary", "End of the temporary table for the semi-join Duplicate Weedout strategy."),
    ("FirstMatch", "Semi-join FirstMatch shortcutting strategy."),
    ("Materialize", "Materialized subquery."),
    ("Start materialize", "Start of a materialized subquery."),
    ("End materialize", "End of a materialized subquery."),
    ("unique row not found", "No row satisfies the UNIQUE or PRIMARY KEY condition."),
    ("Impossible WHERE noticed after reading const tables", "All const tables were read and the WHERE clause is always false."),
    ("Using where", "A WHERE clause restricts which rows are matched or sent to the client."),
    ("Using join buffer", "Rows of earlier tables are buffered to join against this table."),
    ("Using index", "Columns are read from the index alone without reading the rows."),
    ("const row not found", "The table is empty."),
    ("Distinct", "Search stops after the first matching row for each combination."),
    ("Full scan on NULL key", "Subquery fallback when an index cannot be used for a NULL value."),
    ("Impossible HAVING", "The HAVING clause is always false."),
    ("Impossible WHERE", "The WHERE clause is always false."),
    ("LooseScan", "Semi-join LooseScan strategy."),
    ("No matching min/max row", "No row satisfies the condition of a MIN()/MAX() query."),
    ("no matching row in const table", "A const table is empty or has no row matching a unique index condition."),
    ("No matching rows after partition pruning", "Partition pruning left nothing to delete or update."),
    ("No tables used", "The query has no FROM clause or uses FROM DUAL."),
];

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Longest known `Extra` key an item starts with; `Using join buffer (Block
/// Nested Loop)` → `Using join buffer`.
fn extra_key(item: &str) -> Option<(&'static str, &'static str)> {
    EXTRA_ITEMS
        .iter()
        .filter(|(key, _)| {
            item == *key
                || item
                    .strip_prefix(key)
                    .is_some_and(|rest| rest.starts_with(' ') || rest.starts_with('('))
        })
        .max_by_key(|(key, _)| key.len())
        .copied()
}

/// 주석기: 임계값 기반 plan 분석
#[derive(Debug, Clone, Default)]
pub struct Annotator {
    config: AnnotatorConfig,
}

impl Annotator {
    pub fn new(config: AnnotatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    fn warns(list: &[String], value: &str) -> bool {
        list.iter().any(|w| !w.is_empty() && w == value)
    }

    fn severity(warn: bool) -> Severity {
        if warn { Severity::Warning } else { Severity::Info }
    }

    /// Findings for one explained statement.
    pub fn annotate(&self, info: &ExplainInfo) -> Vec<Finding> {
        let diagnostics = SessionDiagnostics {
            warnings: info.warnings.clone(),
            last_query_cost: info.query_cost,
            ..SessionDiagnostics::default()
        };
        let mut findings = self.annotate_rows(&info.rows, &diagnostics);
        findings.extend(info.messages.iter().map(|m| {
            Finding::new(FindingKind::Message, m, m.clone(), Severity::Info)
        }));
        findings
    }

    /// Findings for plan rows plus the diagnostics captured alongside them.
    pub fn annotate_rows(&self, rows: &[PlanRow], diagnostics: &SessionDiagnostics) -> Vec<Finding> {
        let mut findings = Vec::new();
        self.select_types(rows, &mut findings);
        self.access_types(rows, &mut findings);
        self.extras(rows, &mut findings);
        self.thresholds(rows, &mut findings);
        self.diagnostics(diagnostics, &mut findings);
        findings
    }

    fn select_types(&self, rows: &[PlanRow], findings: &mut Vec<Finding>) {
        let mut seen = HashSet::new();
        for row in rows {
            let select_type = row.select_type.as_str();
            if select_type.is_empty() || !seen.insert(select_type) {
                continue;
            }
            let warn = Self::warns(&self.config.warn_select_types, select_type);
            let message = lookup(SELECT_TYPES, select_type);
            if message.is_some() || warn {
                findings.push(Finding::new(
                    FindingKind::SelectType,
                    select_type,
                    message.unwrap_or("select type on the warn list"),
                    Self::severity(warn),
                ));
            }
        }
    }

    fn access_types(&self, rows: &[PlanRow], findings: &mut Vec<Finding>) {
        let mut seen = HashSet::new();
        for row in rows {
            let access_type = row.access_type.as_str();
            if !seen.insert(access_type) {
                continue;
            }
            if let Some(message) = lookup(ACCESS_TYPES, access_type) {
                let warn = Self::warns(&self.config.warn_access_types, access_type);
                findings.push(Finding::new(
                    FindingKind::AccessType,
                    access_type,
                    message,
                    Self::severity(warn),
                ));
            }
        }
    }

    fn extras(&self, rows: &[PlanRow], findings: &mut Vec<Finding>) {
        let mut seen = HashSet::new();
        for item in rows.iter().flat_map(PlanRow::extra_items) {
            let Some((key, message)) = extra_key(item) else {
                continue;
            };
            if !seen.insert(key) {
                continue;
            }
            let warn = Self::warns(&self.config.warn_extra, key);
            findings.push(Finding::new(FindingKind::Extra, key, message, Self::severity(warn)));
        }
    }

    fn thresholds(&self, rows: &[PlanRow], findings: &mut Vec<Finding>) {
        let mut scalability_seen = HashSet::new();
        let check_filtered = self.config.max_filtered > 0.001;
        for (i, row) in rows.iter().enumerate() {
            if row.rows >= self.config.max_rows {
                findings.push(Finding::new(
                    FindingKind::Rows,
                    &row.table,
                    format!("{} rows examined (limit {})", row.rows, self.config.max_rows),
                    Severity::Warning,
                ));
            }
            // driving table of a join is not judged on filtered
            let driving = i == 0 && rows.len() > 1;
            if check_filtered && !driving && row.filtered > self.config.max_filtered {
                findings.push(Finding::new(
                    FindingKind::Filtered,
                    &row.table,
                    format!("filtered {:.2}% (limit {:.2}%)", row.filtered, self.config.max_filtered),
                    Severity::Warning,
                ));
            }
            let class = row.scalability.as_str();
            if Self::warns(&self.config.warn_scalability, class) && scalability_seen.insert(class) {
                findings.push(Finding::new(
                    FindingKind::Scalability,
                    class,
                    format!("access on {} scales as {class}", row.table),
                    Severity::Warning,
                ));
            }
        }
    }

    fn diagnostics(&self, diagnostics: &SessionDiagnostics, findings: &mut Vec<Finding>) {
        if let Some(cost) = diagnostics.last_query_cost {
            if cost > self.config.max_cost {
                findings.push(Finding::new(
                    FindingKind::Cost,
                    "last_query_cost",
                    format!("query cost {cost:.3} exceeds {:.3}", self.config.max_cost),
                    Severity::Warning,
                ));
            }
        }
        for warning in &diagnostics.warnings {
            findings.push(Finding::new(
                FindingKind::ServerWarning,
                &warning.code.to_string(),
                warning.message.clone(),
                Severity::Info,
            ));
        }
        if diagnostics.trace.as_ref().is_some_and(|t| t.is_incomplete()) {
            findings.push(Finding::new(
                FindingKind::Trace,
                "optimizer_trace",
                "optimizer trace is truncated or hidden by missing privileges",
                Severity::Warning,
            ));
        }
    }
}
