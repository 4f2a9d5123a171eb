//! Environment preparation: connectors for source and sandbox plus the
//! availability checks deciding whether the sandbox may be used at all.

use super::SandboxBuilder;
use crate::config::SbxConfig;
use crate::connector::{Backend, Connector};
use crate::sampling::Sampler;
use std::sync::Arc;
use tracing::{info, warn};

/// Source and sandbox connectors after the availability checks.
///
/// A sandbox that fails any check is [disabled](Connector::disabled), never
/// an error; callers fall back to analysis without EXPLAIN.
#[derive(Debug, Clone)]
pub struct Environment {
    pub source: Connector,
    pub sandbox: Connector,
    pub source_version: Option<u32>,
    pub sandbox_version: Option<u32>,
    config: SbxConfig,
}

impl Environment {
    /// 환경 준비
    pub async fn prepare(config: &SbxConfig, backend: Arc<dyn Backend>) -> Self {
        let settings = config.connector_settings();
        let mut sandbox = Connector::new(config.sandbox.clone(), settings.clone(), Arc::clone(&backend));

        let sandbox_version = match sandbox.version().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(dsn = %config.sandbox.redacted(), error = %e, "sandbox not available");
                sandbox = sandbox.disabled();
                None
            }
        };

        let source_dsn = if config.source.user.is_empty() {
            warn!(dsn = %config.sandbox.redacted(), "no source configured, using the sandbox as source");
            config.sandbox.clone()
        } else {
            config.source.clone()
        };
        let mut source = Connector::new(source_dsn, settings, backend);

        let source_version = match source.version().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(dsn = %source.dsn().redacted(), error = %e, "source not available");
                sandbox = sandbox.disabled();
                None
            }
        };

        if source.dsn().addr == sandbox.dsn().addr && !config.allow_source_as_sandbox {
            warn!(addr = %sandbox.dsn().addr, "source and sandbox are the same server");
            sandbox = sandbox.disabled();
            source = source.disabled();
        }

        if let (Some(sandbox_v), Some(source_v)) = (sandbox_version, source_version) {
            if sandbox_v < source_v {
                warn!(sandbox_v, source_v, "sandbox server older than source, not used");
                sandbox = sandbox.disabled();
            }
        }

        info!(
            source = %source.dsn().redacted(),
            sandbox = %sandbox.dsn().redacted(),
            sandbox_enabled = !sandbox.is_disabled(),
            "environment prepared"
        );
        Self {
            source,
            sandbox,
            source_version,
            sandbox_version,
            config: config.clone(),
        }
    }

    pub fn sandbox_enabled(&self) -> bool {
        !self.sandbox.is_disabled()
    }

    /// New builder on this sandbox, sampling when configured.
    pub fn builder(&self) -> SandboxBuilder {
        let builder = SandboxBuilder::new(self.sandbox.clone(), self.config.sandbox_options.clone());
        if self.config.sampling.enabled {
            builder.with_sampler(Sampler::new(self.config.sampling.clone()))
        } else {
            builder
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Dsn, MemoryBackend, ResultSet};

    fn config() -> SbxConfig {
        SbxConfig {
            source: Dsn::new("prod:3306", "ro", "", "world"),
            sandbox: Dsn::new("sandbox:3306", "root", "", ""),
            ..SbxConfig::default()
        }
    }

    fn version(backend: &MemoryBackend, addr: &str, v: &str) {
        backend.respond_on(addr, "select @@version", ResultSet::from_text(&["@@version"], &[&[Some(v)]]));
    }

    #[tokio::test]
    async fn test_both_available() {
        let backend = Arc::new(MemoryBackend::new());
        version(&backend, "prod:3306", "5.7.40-log");
        version(&backend, "sandbox:3306", "8.0.32");
        let env = Environment::prepare(&config(), backend).await;
        assert!(env.sandbox_enabled());
        assert_eq!(env.source_version, Some(50740));
        assert_eq!(env.sandbox_version, Some(80032));
        assert!(env.sandbox.is_sandbox());
        assert!(!env.source.is_sandbox());
    }

    #[tokio::test]
    async fn test_older_sandbox_is_disabled() {
        let backend = Arc::new(MemoryBackend::new());
        version(&backend, "prod:3306", "8.0.32");
        version(&backend, "sandbox:3306", "5.7.40");
        let env = Environment::prepare(&config(), backend).await;
        assert!(!env.sandbox_enabled());
        assert!(!env.source.is_disabled());
    }

    #[tokio::test]
    async fn test_unreachable_sandbox_is_disabled() {
        let backend = Arc::new(MemoryBackend::new());
        version(&backend, "prod:3306", "8.0.32");
        backend.unreachable("sandbox:3306");
        let env = Environment::prepare(&config(), backend).await;
        assert!(!env.sandbox_enabled());
        assert_eq!(env.sandbox_version, None);
    }

    #[tokio::test]
    async fn test_same_server_disables_both() {
        let backend = Arc::new(MemoryBackend::new());
        version(&backend, "sandbox:3306", "8.0.32");
        let mut cfg = config();
        cfg.source.user.clear();
        let env = Environment::prepare(&cfg, backend.clone()).await;
        assert!(!env.sandbox_enabled());
        assert!(env.source.is_disabled());

        cfg.allow_source_as_sandbox = true;
        let env = Environment::prepare(&cfg, backend).await;
        assert!(env.sandbox_enabled());
        assert_eq!(env.source.dsn().addr, "sandbox:3306");
    }

    #[tokio::test]
    async fn test_builder_samples_when_enabled() {
        let backend = Arc::new(MemoryBackend::new());
        let mut cfg = config();
        cfg.sampling.enabled = true;
        let env = Environment::prepare(&cfg, backend).await;
        let builder = env.builder();
        assert_eq!(builder.config().prefix, "optimizer");
        assert!(builder.sampler().is_some());
    }
}
