//! Session diagnostics: warnings, last query cost, PROFILE and OPTIMIZER
//! TRACE output, plus the panic boundary around diagnostic commands.

pub mod profile;
pub mod trace;

pub use profile::{Profile, ProfileRow};
pub use trace::{Trace, TraceRow};

use crate::connector::{ResultSet, Value};
use crate::error::{SbxError, SbxResult};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Deprecated `EXPLAIN EXTENDED` syntax note; noise on 5.7+.
pub const DEPRECATED_EXTENDED_CODE: u32 = 1681;

/// A `SHOW WARNINGS` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub level: String,
    pub code: u32,
    pub message: String,
}

impl Warning {
    pub fn from_result_set(rs: &ResultSet) -> Vec<Warning> {
        (0..rs.rows.len())
            .map(|row| Warning {
                level: rs.text(row, "Level").unwrap_or_default(),
                code: rs
                    .value(row, "Code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u32::try_from(c).ok())
                    .unwrap_or(0),
                message: rs.text(row, "Message").unwrap_or_default(),
            })
            .collect()
    }
}

/// Side-channel results captured on the session that ran a statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionDiagnostics {
    pub warnings: Vec<Warning>,
    pub last_query_cost: Option<f64>,
    pub profile: Option<Profile>,
    pub trace: Option<Trace>,
}

impl SessionDiagnostics {
    /// Value column of `SHOW SESSION STATUS LIKE 'last_query_cost'`.
    pub fn cost_from_status(rs: &ResultSet) -> Option<f64> {
        rs.value(0, "Value").and_then(Value::as_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
            && self.last_query_cost.is_none()
            && self.profile.is_none()
            && self.trace.is_none()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs a diagnostic command, turning a panic into
/// [`SbxError::DiagnosticPanic`] so one statement cannot take down a batch.
pub async fn guarded<T, F>(statement: &str, fut: F) -> SbxResult<T>
where
    F: Future<Output = SbxResult<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload);
            error!(sql = statement, %message, "diagnostic command panicked");
            Err(SbxError::DiagnosticPanic {
                statement: statement.to_string(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_from_result_set() {
        let rs = ResultSet::from_text(
            &["Level", "Code", "Message"],
            &[
                &[Some("Warning"), Some("1681"), Some("'EXTENDED' is deprecated")],
                &[Some("Note"), Some("1003"), Some("/* select#1 */ select 1")],
            ],
        );
        let warnings = Warning::from_result_set(&rs);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].code, DEPRECATED_EXTENDED_CODE);
        assert_eq!(warnings[1].level, "Note");
    }

    #[tokio::test]
    async fn test_guarded_passes_results_through() {
        let ok = guarded("select 1", async { Ok::<_, SbxError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = guarded("select 1", async { Err::<i32, _>(SbxError::PlanParse("x".into())) }).await;
        assert!(matches!(err, Err(SbxError::PlanParse(_))));
    }

    #[tokio::test]
    async fn test_guarded_recovers_panics() {
        let result: SbxResult<()> = guarded("explain select 1", async {
            let layout: Option<&str> = None;
            let _ = layout.expect("unexpected explain layout");
            Ok(())
        })
        .await;
        match result {
            Err(SbxError::DiagnosticPanic { statement, message }) => {
                assert_eq!(statement, "explain select 1");
                assert_eq!(message, "unexpected explain layout");
            }
            other => panic!("expected DiagnosticPanic, got {other:?}"),
        }
    }
}
