//! Statement-source collaborator built on sqlparser-rs.
//!
//! Supplies statement kind, referenced tables and columns, the DML → SELECT
//! rewrite and MySQL quoting helpers.

pub mod escape;
pub mod parser;
pub mod rewrite;

pub use parser::{ColumnRef, ParsedStatement, SqlParser, StatementKind, TableRef};
pub use rewrite::write_to_select;
