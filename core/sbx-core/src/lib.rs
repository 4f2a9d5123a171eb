//! # SBX: MySQL Statement Review Sandbox
//!
//! SBX는 운영 DB(source)를 건드리지 않고 SQL 문의 실행 계획을 검토하기 위한 코어
//! 라이브러리입니다. 문장이 참조하는 스키마만 격리된 sandbox 서버에 shadow
//! database로 복제하고, 필요하면 행 샘플을 복사한 뒤 EXPLAIN을 실행합니다.
//!
//! ## 주요 특징
//!
//! - **Guarded Connector**: sandbox 외의 주소에는 읽기 전용 문장만 허용
//! - **Shadow Mapping**: 빌더마다 충돌 없는 `optimizer_<ts>_<rand>` 이름
//! - **Sampling Engine**: 통계 목표치 기반 무작위 샘플 복사
//! - **Plan Parser**: tabular / vertical / `FORMAT=JSON` → 동일한 [`PlanRow`] 목록
//! - **Plan Annotator**: 임계값 기반 경고
//!
//! ## 빠른 시작
//!
//! ```rust
//! use sbx_core::explain::{Annotator, AnnotatorConfig, parse_explain_text};
//!
//! # fn main() -> sbx_core::SbxResult<()> {
//! let raw = r#"{"query_block": {"select_id": 1,
//!     "table": {"table_name": "city", "access_type": "ALL",
//!               "rows_examined_per_scan": 4188, "filtered": "10.00"}}}"#;
//!
//! let info = parse_explain_text(raw)?;
//! assert_eq!(info.rows[0].access_type, "ALL");
//!
//! let findings = Annotator::new(AnnotatorConfig::default()).annotate(&info);
//! assert!(findings.iter().any(|f| f.is_warning()));
//! # Ok(())
//! # }
//! ```
//!
//! ## 모듈 구조
//!
//! - [`connector`]: 게이트가 걸린 세션, SHOW 헬퍼, 스크립트 백엔드
//! - [`sandbox`]: Sandbox Builder, Shadow Mapping, teardown
//! - [`sampling`]: Sampling Engine
//! - [`explain`]: EXPLAIN 실행, Plan Parser, Plan Annotator
//! - [`diagnostics`]: warnings, PROFILE, OPTIMIZER TRACE
//! - [`sql`]: sqlparser-rs 기반 문장 분석

pub mod config;
pub mod connector;
pub mod diagnostics;
pub mod error;
pub mod explain;
pub mod meta;
pub mod sampling;
pub mod sandbox;
pub mod sql;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use config::SbxConfig;
pub use connector::{Connector, Dsn, MemoryBackend, MySqlBackend};
pub use error::{SbxError, SbxResult};
pub use explain::{ExplainInfo, PlanRow};
pub use sandbox::{Environment, SandboxBuilder};
