//! 설정: one serde document for the whole core, with environment overrides.

use crate::connector::{ConnectorSettings, Dsn};
use crate::error::{SbxError, SbxResult};
use crate::explain::{AnnotatorConfig, ExplainConfig};
use crate::sampling::SamplingConfig;
use crate::sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbxConfig {
    /// Production server; only ever read from
    pub source: Dsn,
    /// Disposable server receiving the shadow databases
    pub sandbox: Dsn,
    /// Permit `source` and `sandbox` to name the same server
    pub allow_source_as_sandbox: bool,
    pub connect_timeout_ms: u64,
    pub query_timeout_ms: u64,
    /// Capture `SHOW WARNINGS` after EXPLAIN
    pub show_warnings: bool,
    /// Capture `last_query_cost` after EXPLAIN
    pub show_last_query_cost: bool,
    pub sampling: SamplingConfig,
    pub explain: ExplainConfig,
    pub annotator: AnnotatorConfig,
    pub sandbox_options: SandboxConfig,
}

impl Default for SbxConfig {
    fn default() -> Self {
        Self {
            source: Dsn::default(),
            sandbox: Dsn::default(),
            allow_source_as_sandbox: false,
            connect_timeout_ms: 3000,
            query_timeout_ms: 60000,
            show_warnings: false,
            show_last_query_cost: false,
            sampling: SamplingConfig::default(),
            explain: ExplainConfig::default(),
            annotator: AnnotatorConfig::default(),
            sandbox_options: SandboxConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> SbxResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SbxError::Config(format!("{key}: invalid value '{value}'")))
}

fn parse_flag(key: &str, value: &str) -> SbxResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(SbxError::Config(format!("{key}: invalid flag '{value}'"))),
    }
}

impl SbxConfig {
    pub fn from_json(json: &str) -> SbxResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SbxResult<()> {
        if self.query_timeout_ms == 0 {
            return Err(SbxError::Config("query_timeout_ms must be positive".to_string()));
        }
        if self.sampling.batch_rows == 0 {
            return Err(SbxError::Config("sampling.batch_rows must be positive".to_string()));
        }
        if self.sandbox_options.prefix.is_empty() {
            return Err(SbxError::Config("sandbox_options.prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Connector knobs; the sandbox address is the only writable target.
    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            sandbox_addr: self.sandbox.addr.clone(),
            show_warnings: self.show_warnings,
            show_last_query_cost: self.show_last_query_cost,
        }
    }

    /// 환경 변수에서 로드 (`SBX_*`)
    pub fn apply_env(&mut self) -> SbxResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overrides fields from `lookup`; unset keys leave fields untouched.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> SbxResult<()> {
        for (prefix, dsn) in [("SBX_SOURCE", &mut self.source), ("SBX_SANDBOX", &mut self.sandbox)] {
            if let Some(v) = lookup(&format!("{prefix}_ADDR")) {
                dsn.addr = v;
            }
            if let Some(v) = lookup(&format!("{prefix}_USER")) {
                dsn.user = v;
            }
            if let Some(v) = lookup(&format!("{prefix}_PASSWORD")) {
                dsn.password = v;
            }
            if let Some(v) = lookup(&format!("{prefix}_SCHEMA")) {
                dsn.schema = v;
            }
        }
        if let Some(v) = lookup("SBX_SAMPLING") {
            self.sampling.enabled = parse_flag("SBX_SAMPLING", &v)?;
        }
        if let Some(v) = lookup("SBX_SAMPLING_TARGET") {
            self.sampling.statistic_target = parse_env("SBX_SAMPLING_TARGET", &v)?;
        }
        if let Some(v) = lookup("SBX_QUERY_TIMEOUT_MS") {
            self.query_timeout_ms = parse_env("SBX_QUERY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SBX_ALLOW_SOURCE_AS_SANDBOX") {
            self.allow_source_as_sandbox = parse_flag("SBX_ALLOW_SOURCE_AS_SANDBOX", &v)?;
        }
        self.validate()
    }
}
