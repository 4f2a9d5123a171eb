//! sqlx-backed MySQL backend.
//!
//! Uses the text protocol (`raw_sql`) so every cell arrives as the exact bytes
//! the server rendered.

use super::Dsn;
use super::backend::{Backend, RowEvent, SessionOutcome, SessionRequest};
use super::result::{ColumnMeta, ResultSet, Row, Value};
use crate::error::{SbxError, SbxResult};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row as _, TypeInfo};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlBackend;

impl MySqlBackend {
    pub fn new() -> Self {
        Self
    }
}

fn connect_options(dsn: &Dsn) -> SbxResult<MySqlConnectOptions> {
    let mut options = MySqlConnectOptions::new()
        .username(&dsn.user)
        .password(&dsn.password)
        .database(dsn.schema_or_default())
        .charset(&dsn.charset);

    if dsn.addr.starts_with('/') {
        options = options.socket(&dsn.addr);
    } else {
        let (host, port) = match dsn.addr.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| SbxError::Config(format!("bad port in '{}': {e}", dsn.addr)))?;
                (host, port)
            }
            None => (dsn.addr.as_str(), DEFAULT_PORT),
        };
        options = options.host(host).port(port);
    }
    Ok(options)
}

async fn connect(dsn: &Dsn, connect_timeout: Duration) -> SbxResult<MySqlConnection> {
    let options = connect_options(dsn)?;
    debug!(dsn = %dsn.redacted(), "opening session");
    tokio::time::timeout(connect_timeout, options.connect())
        .await
        .map_err(|_| SbxError::Timeout {
            stage: "connect",
            limit: connect_timeout,
        })?
        .map_err(SbxError::from)
}

fn columns_of(row: &MySqlRow) -> Vec<ColumnMeta> {
    row.columns()
        .iter()
        .map(|c| ColumnMeta::new(c.name(), c.type_info().name()))
        .collect()
}

fn convert_row(row: &MySqlRow) -> SbxResult<Row> {
    let values = (0..row.len())
        .map(|i| {
            row.try_get_unchecked::<Option<Vec<u8>>, _>(i)
                .map(|cell| cell.map_or(Value::Null, Value::Bytes))
                .map_err(SbxError::from)
        })
        .collect::<SbxResult<Vec<_>>>()?;
    Ok(Row::new(values))
}

async fn fetch(conn: &mut MySqlConnection, sql: &str) -> SbxResult<ResultSet> {
    let rows = conn.fetch_all(sqlx::raw_sql(sql)).await?;
    let columns = rows.first().map(columns_of).unwrap_or_default();
    let rows = rows.iter().map(convert_row).collect::<SbxResult<Vec<_>>>()?;
    Ok(ResultSet::new(columns, rows))
}

#[async_trait]
impl Backend for MySqlBackend {
    async fn run(
        &self,
        dsn: &Dsn,
        request: &SessionRequest,
        connect_timeout: Duration,
    ) -> SbxResult<SessionOutcome> {
        let mut conn = connect(dsn, connect_timeout).await?;

        for stmt in &request.setup {
            conn.execute(sqlx::raw_sql(stmt)).await?;
        }
        let primary = if request.discard_primary {
            conn.execute(sqlx::raw_sql(&request.statement)).await?;
            ResultSet::default()
        } else {
            fetch(&mut conn, &request.statement).await?
        };
        let mut follow_up = Vec::with_capacity(request.follow_up.len());
        for stmt in &request.follow_up {
            follow_up.push(fetch(&mut conn, stmt).await?);
        }

        let _ = conn.close().await;
        Ok(SessionOutcome { primary, follow_up })
    }

    async fn stream(
        &self,
        dsn: &Dsn,
        sql: &str,
        tx: mpsc::Sender<RowEvent>,
        connect_timeout: Duration,
    ) -> SbxResult<()> {
        let mut conn = connect(dsn, connect_timeout).await?;
        let mut rows = sqlx::raw_sql(sql).fetch(&mut conn);
        let mut announced = false;

        while let Some(row) = rows.try_next().await? {
            if !announced {
                if tx.send(RowEvent::Columns(columns_of(&row))).await.is_err() {
                    break;
                }
                announced = true;
            }
            if tx.send(RowEvent::Row(convert_row(&row)?)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_accept_host_port_and_socket() {
        let dsn = Dsn::new("127.0.0.1:3307", "root", "secret", "world");
        assert!(connect_options(&dsn).is_ok());

        let dsn = Dsn::new("db.internal", "root", "", "");
        assert!(connect_options(&dsn).is_ok());

        let dsn = Dsn::new("/var/run/mysqld/mysqld.sock", "root", "", "");
        assert!(connect_options(&dsn).is_ok());
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let dsn = Dsn::new("127.0.0.1:db", "root", "", "");
        assert!(matches!(connect_options(&dsn), Err(SbxError::Config(_))));
    }
}
