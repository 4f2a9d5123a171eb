//! Connector: guarded database sessions.
//!
//! Every call opens a fresh session through a [`Backend`], runs under the
//! query deadline, and passes the safety gate first. Statements aimed at any
//! address other than the sandbox must be read-only.

pub mod backend;
pub mod guard;
pub mod memory;
pub mod mysql;
pub mod result;
pub mod show;

pub use backend::{Backend, RowEvent, SessionOutcome, SessionRequest};
pub use memory::MemoryBackend;
pub use mysql::MySqlBackend;
pub use result::{ColumnMeta, ResultSet, Row, Value};
pub use show::TableStatus;

use crate::diagnostics::{SessionDiagnostics, Warning};
use crate::error::{SbxError, SbxResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_SCHEMA: &str = "information_schema";
const SHOW_WARNINGS: &str = "SHOW WARNINGS";
const SHOW_LAST_QUERY_COST: &str = "SHOW SESSION STATUS LIKE 'last_query_cost'";

/// Connection target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dsn {
    /// `host:port` or a unix socket path
    pub addr: String,
    pub user: String,
    pub password: String,
    /// Target schema; empty means `information_schema`
    pub schema: String,
    pub charset: String,
    pub disabled: bool,
}

impl Default for Dsn {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3306".to_string(),
            user: String::new(),
            password: String::new(),
            schema: DEFAULT_SCHEMA.to_string(),
            charset: "utf8".to_string(),
            disabled: false,
        }
    }
}

impl Dsn {
    pub fn new(addr: &str, user: &str, password: &str, schema: &str) -> Self {
        Self {
            addr: addr.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            schema: schema.to_string(),
            ..Self::default()
        }
    }

    pub fn schema_or_default(&self) -> &str {
        if self.schema.is_empty() {
            DEFAULT_SCHEMA
        } else {
            &self.schema
        }
    }

    /// `user:********@addr/schema`, safe to log.
    pub fn redacted(&self) -> String {
        let password = if self.password.is_empty() { "" } else { ":********" };
        format!(
            "{}{}@{}/{}",
            self.user,
            password,
            self.addr,
            self.schema_or_default()
        )
    }
}

/// Connector-wide knobs, sliced out of [`crate::config::SbxConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorSettings {
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    /// The only address allowed to receive non read-only statements
    pub sandbox_addr: String,
    pub show_warnings: bool,
    pub show_last_query_cost: bool,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            query_timeout: Duration::from_secs(60),
            sandbox_addr: "127.0.0.1:3306".to_string(),
            show_warnings: false,
            show_last_query_cost: false,
        }
    }
}

/// Side-channel queries attached to a statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capture {
    pub warnings: bool,
    pub last_query_cost: bool,
}

impl Capture {
    pub const NONE: Capture = Capture {
        warnings: false,
        last_query_cost: false,
    };

    pub fn follow_up(&self) -> Vec<String> {
        let mut stmts = Vec::new();
        if self.warnings {
            stmts.push(SHOW_WARNINGS.to_string());
        }
        if self.last_query_cost {
            stmts.push(SHOW_LAST_QUERY_COST.to_string());
        }
        stmts
    }
}

/// Guarded session factory.
///
/// Cheap to clone; [`with_schema`](Self::with_schema) gives a copy pointed at
/// another logical database.
#[derive(Clone)]
pub struct Connector {
    dsn: Dsn,
    settings: ConnectorSettings,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("dsn", &self.dsn.redacted())
            .field("sandbox", &self.is_sandbox())
            .field("disabled", &self.dsn.disabled)
            .finish()
    }
}

impl Connector {
    /// 새 커넥터 생성
    pub fn new(dsn: Dsn, settings: ConnectorSettings, backend: Arc<dyn Backend>) -> Self {
        Self {
            dsn,
            settings,
            backend,
        }
    }

    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    pub fn database(&self) -> &str {
        self.dsn.schema_or_default()
    }

    /// Same server and credentials, different target schema.
    pub fn with_schema(&self, schema: &str) -> Self {
        let mut copy = self.clone();
        copy.dsn.schema = schema.to_string();
        copy
    }

    /// Copy that refuses every call.
    pub fn disabled(&self) -> Self {
        let mut copy = self.clone();
        copy.dsn.disabled = true;
        copy
    }

    pub fn is_disabled(&self) -> bool {
        self.dsn.disabled
    }

    pub fn is_sandbox(&self) -> bool {
        self.dsn.addr == self.settings.sandbox_addr
    }

    /// Disabled check plus the read-only gate. Runs before any I/O.
    pub fn check(&self, sql: &str) -> SbxResult<()> {
        if self.dsn.disabled {
            return Err(SbxError::Disabled(self.dsn.redacted()));
        }
        if !self.is_sandbox() && guard::is_dangerous(sql) {
            warn!(addr = %self.dsn.addr, database = %self.database(), "query execution denied");
            return Err(SbxError::Denied {
                addr: self.dsn.addr.clone(),
                database: self.database().to_string(),
                sql: sql.to_string(),
            });
        }
        Ok(())
    }

    async fn deadline<T>(&self, stage: &'static str, fut: impl Future<Output = SbxResult<T>>) -> SbxResult<T> {
        let limit = self.settings.query_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(addr = %self.dsn.addr, ?limit, stage, "deadline exceeded, session abandoned");
                Err(SbxError::Timeout { stage, limit })
            }
        }
    }

    /// Runs a whole session request.
    ///
    /// The primary statement goes through [`check`](Self::check); setup and
    /// follow-up statements may additionally be session-scoped `SET`s.
    pub async fn session(&self, request: SessionRequest) -> SbxResult<SessionOutcome> {
        self.check(&request.statement)?;
        for aux in request.setup.iter().chain(&request.follow_up) {
            if !guard::is_session_setting(aux) {
                self.check(aux)?;
            }
        }
        debug!(dsn = %self.dsn.redacted(), sql = %request.statement, "execute");
        let connect_timeout = self.settings.connect_timeout;
        self.deadline("query", self.backend.run(&self.dsn, &request, connect_timeout))
            .await
    }

    /// Executes `sql`, capturing diagnostics per the connector settings.
    pub async fn query(&self, sql: &str) -> SbxResult<ResultSet> {
        let capture = Capture {
            warnings: self.settings.show_warnings,
            last_query_cost: self.settings.show_last_query_cost,
        };
        self.query_with(sql, capture).await
    }

    /// Executes `sql` without side-channel queries.
    pub async fn execute(&self, sql: &str) -> SbxResult<ResultSet> {
        self.query_with(sql, Capture::NONE).await
    }

    pub async fn query_with(&self, sql: &str, capture: Capture) -> SbxResult<ResultSet> {
        let request = SessionRequest {
            setup: Vec::new(),
            statement: sql.to_string(),
            follow_up: capture.follow_up(),
            discard_primary: false,
        };
        let outcome = self.session(request).await?;
        let mut follow_up = outcome.follow_up.into_iter();
        let mut primary = outcome.primary;

        if capture.warnings {
            if let Some(rs) = follow_up.next() {
                primary.diagnostics.warnings = Warning::from_result_set(&rs);
            }
        }
        if capture.last_query_cost {
            if let Some(rs) = follow_up.next() {
                primary.diagnostics.last_query_cost = SessionDiagnostics::cost_from_status(&rs);
            }
        }
        Ok(primary)
    }

    /// Streams a gated read into `tx` under the query deadline.
    pub async fn stream(&self, sql: &str, tx: mpsc::Sender<RowEvent>) -> SbxResult<()> {
        self.check(sql)?;
        debug!(dsn = %self.dsn.redacted(), sql, "stream");
        let connect_timeout = self.settings.connect_timeout;
        self.deadline("stream", self.backend.stream(&self.dsn, sql, tx, connect_timeout))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(addr: &str, backend: Arc<MemoryBackend>) -> Connector {
        let settings = ConnectorSettings {
            sandbox_addr: "sandbox:3306".to_string(),
            ..ConnectorSettings::default()
        };
        Connector::new(Dsn::new(addr, "root", "pw", "world"), settings, backend)
    }

    #[tokio::test]
    async fn test_denied_before_any_io() {
        let backend = Arc::new(MemoryBackend::new());
        let prod = connector("prod:3306", backend.clone());

        let err = prod.query("DELETE FROM city").await.unwrap_err();
        assert!(matches!(err, SbxError::Denied { .. }));
        assert!(backend.executed().is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_accepts_writes() {
        let backend = Arc::new(MemoryBackend::new());
        let sandbox = connector("sandbox:3306", backend.clone());
        sandbox.execute("CREATE DATABASE shadow").await.unwrap();
        assert_eq!(backend.executed_on("sandbox:3306"), vec!["CREATE DATABASE shadow"]);
    }

    #[tokio::test]
    async fn test_disabled_connector_refuses() {
        let backend = Arc::new(MemoryBackend::new());
        let sandbox = connector("sandbox:3306", backend.clone()).disabled();
        assert!(matches!(sandbox.execute("select 1").await, Err(SbxError::Disabled(_))));
        assert!(backend.executed().is_empty());
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let backend = Arc::new(MemoryBackend::new());
        backend.delay("sleep", Duration::from_secs(5));
        let settings = ConnectorSettings {
            query_timeout: Duration::from_millis(50),
            sandbox_addr: "sandbox:3306".to_string(),
            ..ConnectorSettings::default()
        };
        let conn = Connector::new(Dsn::new("sandbox:3306", "root", "", ""), settings, backend);
        let err = conn.execute("select sleep(5)").await.unwrap_err();
        assert!(matches!(err, SbxError::Timeout { stage: "query", .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_diagnostics_are_attached() {
        let backend = Arc::new(MemoryBackend::new());
        backend.respond("select id from city", ResultSet::from_text(&["id"], &[&[Some("1")]]));
        backend.respond(
            "show warnings",
            ResultSet::from_text(&["Level", "Code", "Message"], &[&[Some("Note"), Some("1003"), Some("/* select#1 */ select ...")]]),
        );
        backend.respond(
            "last_query_cost",
            ResultSet::from_text(&["Variable_name", "Value"], &[&[Some("Last_query_cost"), Some("12.500000")]]),
        );
        let conn = connector("prod:3306", backend);
        let rs = conn
            .query_with("select id from city", Capture { warnings: true, last_query_cost: true })
            .await
            .unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.diagnostics.warnings.len(), 1);
        assert_eq!(rs.diagnostics.warnings[0].code, 1003);
        assert_eq!(rs.diagnostics.last_query_cost, Some(12.5));
    }

    #[tokio::test]
    async fn test_session_gates_every_statement() {
        let backend = Arc::new(MemoryBackend::new());
        let prod = connector("prod:3306", backend.clone());

        let setup_write = SessionRequest {
            setup: vec!["set global read_only = 0".to_string()],
            ..SessionRequest::single("select 1")
        };
        assert!(matches!(prod.session(setup_write).await, Err(SbxError::Denied { .. })));

        let follow_up_write = SessionRequest {
            follow_up: vec!["show warnings".to_string(), "drop table city".to_string()],
            ..SessionRequest::single("select 1")
        };
        assert!(matches!(prod.session(follow_up_write).await, Err(SbxError::Denied { .. })));
        assert!(backend.executed().is_empty());

        let profiling = SessionRequest {
            setup: vec!["set @@profiling=1".to_string()],
            follow_up: vec!["show profile".to_string(), "set @@profiling=0".to_string()],
            ..SessionRequest::single("select 1")
        };
        prod.session(profiling).await.unwrap();
        assert_eq!(backend.executed_on("prod:3306").len(), 4);
    }

    #[tokio::test]
    async fn test_discarded_primary_comes_back_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend.respond("select id from city", ResultSet::from_text(&["id"], &[&[Some("1")], &[Some("2")]]));
        let conn = connector("prod:3306", backend);
        let request = SessionRequest {
            discard_primary: true,
            ..SessionRequest::single("select id from city")
        };
        let outcome = conn.session(request).await.unwrap();
        assert!(outcome.primary.rows.is_empty());
    }

    #[test]
    fn test_redacted_dsn() {
        let dsn = Dsn::new("prod:3306", "admin", "hunter2", "");
        assert_eq!(dsn.redacted(), "admin:********@prod:3306/information_schema");
        assert!(!format!("{:?}", connector("prod:3306", Arc::new(MemoryBackend::new()))).contains("pw"));
    }
}
