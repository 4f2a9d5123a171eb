//! Error types for the SBX sandbox core.
//!
//! All public APIs return `SbxResult<T>`; no panics in library code.
//! Only the fatal class (`Fatal`, `UnsupportedQualifier`) aborts a batch;
//! everything else is attached to the statement that produced it.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for all SBX operations.
#[derive(Debug, Error)]
pub enum SbxError {
    /// Safety gate rejected a non read-only statement on a non-sandbox address
    #[error("query execution denied on {addr}/{database}: {sql}")]
    Denied {
        addr: String,
        database: String,
        sql: String,
    },

    /// Connect or query deadline exceeded; the session was abandoned
    #[error("{stage} timed out after {limit:?}")]
    Timeout { stage: &'static str, limit: Duration },

    /// DDL mirrored into a shadow database failed (duplicate index, ...)
    #[error("sandbox DDL failed: {message}\nSQL: {sql}")]
    SandboxDdl { sql: String, message: String },

    /// Malformed EXPLAIN text or JSON
    #[error("plan parse error: {0}")]
    PlanParse(String),

    /// Unrecoverable sandbox failure
    #[error("fatal: {0}")]
    Fatal(String),

    /// DDL naming a table through a database qualifier
    #[error("database-qualified DDL target is not supported: {table}")]
    UnsupportedQualifier { table: String },

    /// SQL parsing error
    #[error("SQL parse error: {message}\nSQL: {sql}")]
    SqlParse { message: String, sql: String },

    /// Error reported by the database driver or server
    #[error("driver error: {0}")]
    Driver(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value
    #[error("config error: {0}")]
    Config(String),

    /// Connector was switched off (sandbox unreachable or refused)
    #[error("connector disabled: {0}")]
    Disabled(String),

    /// Statement kind not supported by the requested operation
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Panic caught while running a diagnostic command
    #[error("diagnostic command panicked: {message}\nSQL: {statement}")]
    DiagnosticPanic { statement: String, message: String },
}

impl SbxError {
    /// 배치 전체를 중단해야 하는 오류인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(self, SbxError::Fatal(_) | SbxError::UnsupportedQualifier { .. })
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Result type alias for all SBX operations.
pub type SbxResult<T> = Result<T, SbxError>;

// From 구현들
impl From<serde_json::Error> for SbxError {
    fn from(err: serde_json::Error) -> Self {
        SbxError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for SbxError {
    fn from(err: sqlx::Error) -> Self {
        SbxError::Driver(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_denied() {
        let err = SbxError::Denied {
            addr: "10.0.0.1:3306".to_string(),
            database: "world".to_string(),
            sql: "DELETE FROM city".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "query execution denied on 10.0.0.1:3306/world: DELETE FROM city"
        );
    }

    #[test]
    fn error_display_timeout() {
        let err = SbxError::Timeout {
            stage: "query",
            limit: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "query timed out after 1.5s");
    }

    #[test]
    fn error_display_sandbox_ddl() {
        let err = SbxError::SandboxDdl {
            sql: "ALTER TABLE city ADD INDEX idx_c(country_id)".to_string(),
            message: "Duplicate key name 'idx_c'".to_string(),
        };
        assert!(err.to_string().starts_with("sandbox DDL failed: Duplicate key name"));
        assert!(err.to_string().contains("SQL: ALTER TABLE city"));
    }

    #[test]
    fn fatal_class() {
        assert!(SbxError::Fatal("no housekeeping db".to_string()).is_fatal());
        assert!(
            SbxError::UnsupportedQualifier {
                table: "world.city".to_string()
            }
            .is_fatal()
        );
        assert!(SbxError::PlanParse("x".to_string()).is_recoverable());
        assert!(
            SbxError::Timeout {
                stage: "connect",
                limit: Duration::from_secs(3)
            }
            .is_recoverable()
        );
    }

    #[test]
    fn sbx_result_err() {
        let result: SbxResult<i32> = Err(SbxError::Disabled("sandbox".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn from_serde_json() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: SbxError = err.into();
        assert!(matches!(err, SbxError::Serialization(_)));
    }
}
