use super::Dsn;
use super::result::{ColumnMeta, ResultSet, Row};
use crate::error::SbxResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Statements executed back to back on one fresh session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Session setup, results discarded (`set @@profiling=1`, ...)
    pub setup: Vec<String>,
    /// The statement whose rows are returned
    pub statement: String,
    /// Supplementary queries run after the statement (`SHOW WARNINGS`, ...)
    pub follow_up: Vec<String>,
    /// Drain the statement's rows without keeping them; `primary` comes back empty
    pub discard_primary: bool,
}

impl SessionRequest {
    pub fn single(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub primary: ResultSet,
    /// One result set per `follow_up` statement, same order
    pub follow_up: Vec<ResultSet>,
}

/// Streamed scan events; `Columns` always precedes the first `Row`.
#[derive(Debug, Clone)]
pub enum RowEvent {
    Columns(Vec<ColumnMeta>),
    Row(Row),
}

/// The only seam that touches the network.
///
/// Implementations open a new session per call and never reuse it.
/// Deadlines are enforced by the caller, which drops the future on expiry.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn run(
        &self,
        dsn: &Dsn,
        request: &SessionRequest,
        connect_timeout: Duration,
    ) -> SbxResult<SessionOutcome>;

    /// Streams `sql` into `tx`; returns early without error once the
    /// receiver is gone.
    async fn stream(
        &self,
        dsn: &Dsn,
        sql: &str,
        tx: mpsc::Sender<RowEvent>,
        connect_timeout: Duration,
    ) -> SbxResult<()>;
}
