use super::guarded;
use crate::connector::{Connector, ResultSet, SessionRequest, Value};
use crate::error::{SbxError, SbxResult};
use crate::sql::{SqlParser, StatementKind};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRow {
    pub status: String,
    /// Seconds
    pub duration: f64,
}

/// `SHOW PROFILE` output for one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Profile {
    pub rows: Vec<ProfileRow>,
}

impl Profile {
    fn from_result_set(rs: &ResultSet) -> Self {
        let rows = (0..rs.rows.len())
            .map(|row| ProfileRow {
                status: rs.text(row, "Status").unwrap_or_default(),
                duration: rs.value(row, "Duration").and_then(Value::as_f64).unwrap_or(0.0),
            })
            .collect();
        Self { rows }
    }

    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.duration).sum()
    }

    /// Stage with the largest duration.
    pub fn slowest(&self) -> Option<&ProfileRow> {
        self.rows
            .iter()
            .max_by(|a, b| a.duration.total_cmp(&b.duration))
    }
}

impl Connector {
    /// Runs `sql` with session profiling on and returns `SHOW PROFILE`.
    ///
    /// The statement really executes, so the safety gate applies as usual.
    pub async fn profile(&self, sql: &str) -> SbxResult<Profile> {
        let kind = SqlParser::new().analyze(sql)?.kind;
        if !matches!(
            kind,
            StatementKind::Select | StatementKind::Update | StatementKind::Delete
        ) {
            return Err(SbxError::Unsupported(format!(
                "profiling supports SELECT, UPDATE and DELETE, got {kind:?}"
            )));
        }

        let request = SessionRequest {
            setup: vec!["set @@profiling=1".to_string()],
            statement: sql.to_string(),
            follow_up: vec!["show profile".to_string(), "set @@profiling=0".to_string()],
            discard_primary: true,
        };
        let outcome = guarded(sql, self.session(request)).await?;
        let profile = outcome
            .follow_up
            .first()
            .map(Profile::from_result_set)
            .unwrap_or_default();
        Ok(profile)
    }
}
