use super::guarded;
use crate::connector::{Connector, ResultSet, SessionRequest, Value};
use crate::error::{SbxError, SbxResult};
use crate::explain::capabilities;
use crate::sql::{SqlParser, StatementKind};
use serde::Serialize;

/// One row of `information_schema.OPTIMIZER_TRACE`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRow {
    pub query: String,
    /// JSON document as text
    pub trace: String,
    pub missing_bytes_beyond_max_mem_size: u64,
    pub insufficient_privileges: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trace {
    pub rows: Vec<TraceRow>,
}

impl Trace {
    fn from_result_set(rs: &ResultSet) -> Self {
        let rows = (0..rs.rows.len())
            .map(|row| TraceRow {
                query: rs.text(row, "QUERY").unwrap_or_default(),
                trace: rs.text(row, "TRACE").unwrap_or_default(),
                missing_bytes_beyond_max_mem_size: rs
                    .value(row, "MISSING_BYTES_BEYOND_MAX_MEM_SIZE")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                insufficient_privileges: rs
                    .value(row, "INSUFFICIENT_PRIVILEGES")
                    .and_then(Value::as_i64)
                    .is_some_and(|v| v != 0),
            })
            .collect();
        Self { rows }
    }

    /// Any row truncated or hidden by the server.
    pub fn is_incomplete(&self) -> bool {
        self.rows
            .iter()
            .any(|r| r.insufficient_privileges || r.missing_bytes_beyond_max_mem_size > 0)
    }
}

/// Statement actually traced: DML is wrapped in `explain` so it never runs.
fn traced_statement(sql: &str) -> SbxResult<String> {
    match SqlParser::new().analyze(sql)?.kind {
        StatementKind::Select | StatementKind::Update | StatementKind::Delete => {
            Ok(format!("explain {}", sql.trim()))
        }
        StatementKind::Explain => Ok(sql.trim().to_string()),
        kind => Err(SbxError::Unsupported(format!(
            "optimizer trace supports SELECT, UPDATE, DELETE and EXPLAIN, got {kind:?}"
        ))),
    }
}

impl Connector {
    /// Optimizer trace of `sql` (server 5.6 and later).
    pub async fn trace(&self, sql: &str) -> SbxResult<Trace> {
        let version = self.version().await?;
        if !capabilities(version).optimizer_trace {
            return Err(SbxError::Unsupported(format!(
                "optimizer trace needs MySQL 5.6 or later, server is {version}"
            )));
        }
        let statement = traced_statement(sql)?;
        let request = SessionRequest {
            setup: vec!["SET SESSION OPTIMIZER_TRACE='enabled=on'".to_string()],
            statement: statement.clone(),
            follow_up: vec![
                "SELECT * FROM information_schema.OPTIMIZER_TRACE".to_string(),
                "SET SESSION OPTIMIZER_TRACE='enabled=off'".to_string(),
            ],
            discard_primary: false,
        };
        let outcome = guarded(&statement, self.session(request)).await?;
        Ok(outcome
            .follow_up
            .first()
            .map(Trace::from_result_set)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorSettings, Dsn, MemoryBackend};
    use std::sync::Arc;

    fn conn(backend: Arc<MemoryBackend>, version: &str) -> Connector {
        backend.respond(
            "select @@version",
            ResultSet::from_text(&["@@version"], &[&[Some(version)]]),
        );
        let settings = ConnectorSettings {
            sandbox_addr: "sandbox:3306".to_string(),
            ..ConnectorSettings::default()
        };
        Connector::new(Dsn::new("prod:3306", "root", "", "world"), settings, backend)
    }

    #[test]
    fn test_traced_statement() {
        assert_eq!(
            traced_statement("DELETE FROM city WHERE id = 1").unwrap(),
            "explain DELETE FROM city WHERE id = 1"
        );
        assert_eq!(traced_statement("EXPLAIN SELECT 1").unwrap(), "EXPLAIN SELECT 1");
        assert!(traced_statement("DROP TABLE city").is_err());
    }

    #[tokio::test]
    async fn test_trace_wraps_writes_in_explain() {
        let backend = Arc::new(MemoryBackend::new());
        backend.respond(
            "information_schema.optimizer_trace",
            ResultSet::from_text(
                &["QUERY", "TRACE", "MISSING_BYTES_BEYOND_MAX_MEM_SIZE", "INSUFFICIENT_PRIVILEGES"],
                &[&[Some("explain delete from city"), Some("{\"steps\": []}"), Some("0"), Some("0")]],
            ),
        );
        // the explain-wrapped delete passes the read-only gate on production
        let conn = conn(backend.clone(), "5.7.40");
        let trace = conn.trace("delete from city").await.unwrap();

        assert_eq!(trace.rows.len(), 1);
        assert!(!trace.is_incomplete());
        assert!(backend.executed_on("prod:3306").contains(&"explain delete from city".to_string()));
    }

    #[tokio::test]
    async fn test_trace_needs_56() {
        let conn = conn(Arc::new(MemoryBackend::new()), "5.5.62");
        assert!(matches!(conn.trace("select 1").await, Err(SbxError::Unsupported(_))));
    }
}
