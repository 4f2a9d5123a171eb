//! Shadow database teardown.

use super::{SandboxBuilder, parse_shadow_timestamp};
use crate::connector::{Connector, Value};
use crate::error::{SbxError, SbxResult};
use crate::sql::escape::{escape_string, quote_ident};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, info, warn};

impl SandboxBuilder {
    /// Drops every shadow database this builder created and forgets them.
    ///
    /// Safe to call repeatedly; returns how many databases were dropped.
    pub async fn teardown(&mut self) -> usize {
        if self.mapping.is_empty() {
            return 0;
        }
        let mut dropped = 0;
        for shadow in self.mapping.shadows() {
            match self
                .sandbox
                .execute(&format!("drop database if exists {}", quote_ident(&shadow)))
                .await
            {
                Ok(_) => dropped += 1,
                Err(e) => warn!(shadow = %shadow, error = %e, "drop shadow database failed"),
            }
        }
        self.mapping.clear();
        info!(dropped, "sandbox torn down");
        dropped
    }
}

/// Drops `<prefix>_*` databases older than `max_age`, whoever created them.
///
/// Names that do not follow the shadow naming scheme are left alone.
pub async fn cleanup_stale(sandbox: &Connector, prefix: &str, max_age: Duration) -> SbxResult<Vec<String>> {
    let pattern = format!("{}\\_%", escape_string(prefix).replace('_', "\\_"));
    let rs = sandbox
        .execute(&format!("show databases like '{pattern}'"))
        .await?;

    let now = Utc::now();
    let mut dropped = Vec::new();
    for row in &rs.rows {
        let Some(name) = row.get(0).map(Value::to_text) else {
            continue;
        };
        let Some(created) = parse_shadow_timestamp(prefix, &name) else {
            debug!(database = %name, "not a shadow database, skipped");
            continue;
        };
        let age = now.signed_duration_since(created).to_std().unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match sandbox
            .execute(&format!("drop database if exists {}", quote_ident(&name)))
            .await
        {
            Ok(_) => {
                info!(database = %name, ?age, "stale shadow database dropped");
                dropped.push(name);
            }
            Err(e) => warn!(database = %name, error = %e, "drop stale shadow database failed"),
        }
    }
    Ok(dropped)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "no shutdown signal handler");
        std::future::pending::<()>().await;
    }
}

/// Runs `work` and tears the sandbox down afterwards, also after a panic
/// or Ctrl-C (unless `drop_on_exit` is off).
///
/// A panic inside `work` resumes once teardown is done.
pub async fn run_until_shutdown<T, F>(builder: &mut SandboxBuilder, work: F) -> SbxResult<T>
where
    F: AsyncFnOnce(&mut SandboxBuilder) -> T,
{
    let outcome = {
        let work = AssertUnwindSafe(work(&mut *builder)).catch_unwind();
        tokio::select! {
            result = work => Some(result),
            _ = shutdown_signal() => None,
        }
    };

    if builder.config.drop_on_exit {
        builder.teardown().await;
    }

    match outcome {
        Some(Ok(value)) => Ok(value),
        Some(Err(panic)) => std::panic::resume_unwind(panic),
        None => Err(SbxError::Fatal("interrupted by shutdown signal".to_string())),
    }
}
