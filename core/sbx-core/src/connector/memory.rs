//! Scripted in-memory backend.
//!
//! Answers statements from canned result sets and records everything it was
//! asked to run. Used for dry runs and throughout the test-suite.

use super::Dsn;
use super::backend::{Backend, RowEvent, SessionOutcome, SessionRequest};
use super::result::ResultSet;
use crate::error::{SbxError, SbxResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;

/// One statement the backend received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub addr: String,
    pub database: String,
    pub sql: String,
}

#[derive(Debug, Clone)]
enum Response {
    Rows(ResultSet),
    Error(String),
    Delay(Duration, ResultSet),
}

#[derive(Debug, Clone)]
struct Rule {
    addr: Option<String>,
    pattern: String,
    response: Response,
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    log: Vec<Executed>,
    unreachable: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, addr: Option<&str>, pattern: &str, response: Response) {
        self.state.lock().rules.push(Rule {
            addr: addr.map(str::to_string),
            pattern: normalize(pattern),
            response,
        });
    }

    /// Answers statements containing `pattern` (case and whitespace
    /// insensitive) on any address. Earlier rules win.
    pub fn respond(&self, pattern: &str, rows: ResultSet) {
        self.push(None, pattern, Response::Rows(rows));
    }

    /// Same as [`respond`](Self::respond) restricted to one address.
    pub fn respond_on(&self, addr: &str, pattern: &str, rows: ResultSet) {
        self.push(Some(addr), pattern, Response::Rows(rows));
    }

    pub fn fail(&self, pattern: &str, message: &str) {
        self.push(None, pattern, Response::Error(message.to_string()));
    }

    pub fn fail_on(&self, addr: &str, pattern: &str, message: &str) {
        self.push(Some(addr), pattern, Response::Error(message.to_string()));
    }

    pub fn delay(&self, pattern: &str, delay: Duration) {
        self.push(None, pattern, Response::Delay(delay, ResultSet::default()));
    }

    /// Every connection attempt to `addr` fails.
    pub fn unreachable(&self, addr: &str) {
        self.state.lock().unreachable.insert(addr.to_string());
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.state.lock().log.clone()
    }

    /// Executed statements on `addr`, SQL text only.
    pub fn executed_on(&self, addr: &str) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|e| e.addr == addr)
            .map(|e| e.sql.clone())
            .collect()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        let pattern = normalize(pattern);
        self.state
            .lock()
            .log
            .iter()
            .filter(|e| normalize(&e.sql).contains(&pattern))
            .count()
    }

    fn check_reachable(&self, dsn: &Dsn) -> SbxResult<()> {
        if self.state.lock().unreachable.contains(&dsn.addr) {
            return Err(SbxError::Driver(format!("can't connect to {}", dsn.addr)));
        }
        Ok(())
    }

    fn lookup(&self, dsn: &Dsn, sql: &str) -> Option<Response> {
        let mut state = self.state.lock();
        state.log.push(Executed {
            addr: dsn.addr.clone(),
            database: dsn.schema_or_default().to_string(),
            sql: sql.to_string(),
        });
        let normalized = normalize(sql);
        state
            .rules
            .iter()
            .find(|rule| {
                rule.addr.as_deref().is_none_or(|addr| addr == dsn.addr)
                    && normalized.contains(&rule.pattern)
            })
            .map(|rule| rule.response.clone())
    }

    async fn answer(&self, dsn: &Dsn, sql: &str) -> SbxResult<ResultSet> {
        match self.lookup(dsn, sql) {
            None => Ok(ResultSet::default()),
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Error(message)) => Err(SbxError::Driver(message)),
            Some(Response::Delay(delay, rows)) => {
                tokio::time::sleep(delay).await;
                Ok(rows)
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn run(
        &self,
        dsn: &Dsn,
        request: &SessionRequest,
        _connect_timeout: Duration,
    ) -> SbxResult<SessionOutcome> {
        self.check_reachable(dsn)?;
        for stmt in &request.setup {
            self.answer(dsn, stmt).await?;
        }
        let mut primary = self.answer(dsn, &request.statement).await?;
        if request.discard_primary {
            primary = ResultSet::default();
        }
        let mut follow_up = Vec::with_capacity(request.follow_up.len());
        for stmt in &request.follow_up {
            follow_up.push(self.answer(dsn, stmt).await?);
        }
        Ok(SessionOutcome { primary, follow_up })
    }

    async fn stream(
        &self,
        dsn: &Dsn,
        sql: &str,
        tx: mpsc::Sender<RowEvent>,
        _connect_timeout: Duration,
    ) -> SbxResult<()> {
        self.check_reachable(dsn)?;
        let rows = self.answer(dsn, sql).await?;
        if tx.send(RowEvent::Columns(rows.columns)).await.is_err() {
            return Ok(());
        }
        for row in rows.rows {
            if tx.send(RowEvent::Row(row)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
