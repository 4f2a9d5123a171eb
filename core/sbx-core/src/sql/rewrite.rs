//! DML → SELECT rewrite used when the server cannot EXPLAIN writes.

use sqlparser::ast::{FromTable, SetExpr, Statement};

const CONSTANT_SELECT: &str = "select 1 from DUAL";

/// Read-only form of a write statement, `None` for anything that is not
/// INSERT/UPDATE/DELETE.
///
/// - `INSERT ... SELECT` → the SELECT
/// - `INSERT ... VALUES` → `select 1 from DUAL`
/// - `UPDATE` / `DELETE` → `SELECT * FROM <tables> [WHERE ..] [ORDER BY ..] [LIMIT ..]`
pub fn write_to_select(statement: &Statement) -> Option<String> {
    match statement {
        Statement::Insert(insert) => Some(match &insert.source {
            Some(query) if !matches!(query.body.as_ref(), SetExpr::Values(_)) => query.to_string(),
            _ => CONSTANT_SELECT.to_string(),
        }),
        Statement::Update {
            table, selection, ..
        } => {
            let mut sql = format!("SELECT * FROM {table}");
            if let Some(selection) = selection {
                sql.push_str(&format!(" WHERE {selection}"));
            }
            Some(sql)
        }
        Statement::Delete(delete) => {
            let tables = match &delete.from {
                FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
            };
            let mut from: Vec<String> = tables.iter().map(ToString::to_string).collect();
            if let Some(using) = &delete.using {
                from.extend(using.iter().map(ToString::to_string));
            }
            let mut sql = format!("SELECT * FROM {}", from.join(", "));
            if let Some(selection) = &delete.selection {
                sql.push_str(&format!(" WHERE {selection}"));
            }
            if !delete.order_by.is_empty() {
                let order: Vec<String> = delete.order_by.iter().map(ToString::to_string).collect();
                sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
            }
            if let Some(limit) = &delete.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            Some(sql)
        }
        _ => None,
    }
}
