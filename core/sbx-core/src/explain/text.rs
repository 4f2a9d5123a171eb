//! Tabular (`mysql` client grid) and vertical (`\G`) EXPLAIN text.

use super::model::PlanRow;
use crate::error::{SbxError, SbxResult};
use serde::Serialize;

/// Minimum line count of a one-row vertical EXPLAIN (banner plus ten fields).
pub const VERTICAL_MIN_LINES: usize = 11;

/// Input shape of raw EXPLAIN output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanShape {
    Tabular,
    Vertical,
    Json,
}

fn is_border(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("+-") && line.ends_with('+')
}

/// `*************************** 1. row ***************************`
fn is_banner(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 2 && line.starts_with('*') && line.ends_with('*')
}

/// Picks the shape from the first non-whitespace character and rejects
/// input that also carries another shape's markers.
pub fn detect_shape(raw: &str) -> SbxResult<PlanShape> {
    let trimmed = raw.trim_start();
    let shape = match trimmed.chars().next() {
        Some('+') => PlanShape::Tabular,
        Some('*') => PlanShape::Vertical,
        Some('{') => PlanShape::Json,
        Some(c) => {
            return Err(SbxError::PlanParse(format!(
                "unrecognized EXPLAIN output starting with '{c}'"
            )));
        }
        None => return Err(SbxError::PlanParse("empty EXPLAIN output".to_string())),
    };

    let has_border = trimmed.lines().any(is_border);
    let has_banner = trimmed.lines().any(is_banner);
    let ambiguous = match shape {
        PlanShape::Tabular => has_banner,
        PlanShape::Vertical => has_border,
        PlanShape::Json => has_border || has_banner,
    };
    if ambiguous {
        return Err(SbxError::PlanParse(
            "ambiguous EXPLAIN output matches more than one shape".to_string(),
        ));
    }
    Ok(shape)
}

fn split_cells(line: &str) -> Vec<&str> {
    let line = line.trim();
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);
    line.split('|').map(str::trim).collect()
}

/// Parses the bordered grid printed by the `mysql` client.
pub fn parse_tabular(raw: &str) -> SbxResult<Vec<PlanRow>> {
    let lines: Vec<&str> = raw.trim().lines().collect();
    if lines.len() < 3 {
        return Err(SbxError::PlanParse(format!(
            "tabular EXPLAIN needs at least 3 lines, got {}",
            lines.len()
        )));
    }

    let header = split_cells(lines[1]);
    if header
        .first()
        .is_some_and(|h| h.eq_ignore_ascii_case("EXPLAIN"))
    {
        return Err(SbxError::PlanParse(
            "JSON EXPLAIN wrapped in a table; pass the JSON document instead".to_string(),
        ));
    }
    if !header.iter().any(|h| h.eq_ignore_ascii_case("id")) {
        return Err(SbxError::PlanParse("tabular EXPLAIN header has no id column".to_string()));
    }

    let mut rows = Vec::new();
    for line in &lines[2..] {
        let line = line.trim();
        if line.is_empty() || !line.starts_with('|') {
            continue;
        }
        let cells = split_cells(line);
        if cells.len() < header.len() {
            return Err(SbxError::PlanParse(format!(
                "row has {} cells, header has {}",
                cells.len(),
                header.len()
            )));
        }
        let mut row = PlanRow::default();
        for (name, value) in header.iter().zip(cells) {
            row.set_field(name, value)?;
        }
        rows.push(row.finish());
    }
    Ok(rows)
}

/// Parses `\G` output; a row is emitted only once its `Extra` field is read.
pub fn parse_vertical(raw: &str) -> SbxResult<Vec<PlanRow>> {
    let lines: Vec<&str> = raw.trim().lines().collect();
    if lines.len() < VERTICAL_MIN_LINES {
        return Err(SbxError::PlanParse(format!(
            "vertical EXPLAIN needs at least {VERTICAL_MIN_LINES} lines, got {}",
            lines.len()
        )));
    }

    let mut rows = Vec::new();
    let mut current: Option<PlanRow> = None;
    for line in lines {
        if is_banner(line) {
            current = Some(PlanRow::default());
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        // client chatter before the first banner
        let Some(row) = current.as_mut() else {
            continue;
        };
        row.set_field(name, value)?;
        if name.trim().eq_ignore_ascii_case("extra") {
            if let Some(done) = current.take() {
                rows.push(done.finish());
            }
        }
    }

    if rows.is_empty() {
        return Err(SbxError::PlanParse("no complete vertical EXPLAIN row".to_string()));
    }
    Ok(rows)
}
