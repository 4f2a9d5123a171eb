//! Sandbox Builder: minimal shadow copies of the schema a batch touches.
//!
//! Each builder owns its [`ShadowMapping`]; shadow database names carry a
//! random suffix, so concurrent builders against one sandbox server never
//! address the same objects.

pub mod env;
pub mod mapping;
pub mod teardown;

pub use env::Environment;
pub use mapping::{ShadowMapping, parse_shadow_timestamp, shadow_name};
pub use teardown::{cleanup_stale, run_until_shutdown};

use crate::connector::Connector;
use crate::error::{SbxError, SbxResult};
use crate::meta::Meta;
use crate::sampling::Sampler;
use crate::sql::escape::quote_ident;
use crate::sql::{ParsedStatement, SqlParser, StatementKind};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Shadow database name prefix
    pub prefix: String,
    /// Drop every shadow database when the run ends
    pub drop_on_exit: bool,
    /// Age after which [`cleanup_stale`] drops leftovers of other runs
    pub stale_after_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            prefix: "optimizer".to_string(),
            drop_on_exit: true,
            stale_after_secs: 3600,
        }
    }
}

/// How a statement affects the rest of its batch.
enum Flow {
    Continue,
    Stop,
}

/// Text after `AS` in `CREATE ... VIEW name AS select ...`.
fn view_body(ddl: &str) -> Option<&str> {
    let upper = ddl.to_ascii_uppercase();
    let view_at = upper.find(" VIEW ")?;
    let as_at = upper[view_at..].find(" AS ")? + view_at;
    Some(ddl[as_at + 4..].trim())
}

fn definer_pattern() -> SbxResult<Regex> {
    Regex::new(r"(?i)\s*DEFINER\s*=\s*(`[^`]*`|'[^']*'|[^\s@]+)@(`[^`]*`|'[^']*'|\S+)")
        .map_err(|e| SbxError::Config(format!("definer pattern: {e}")))
}

/// 샌드박스 빌더
pub struct SandboxBuilder {
    sandbox: Connector,
    mapping: ShadowMapping,
    /// Logical database unqualified names resolve against
    current_db: Option<String>,
    last_error: Option<SbxError>,
    sampler: Option<Sampler>,
    parser: SqlParser,
    config: SandboxConfig,
}

impl std::fmt::Debug for SandboxBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBuilder")
            .field("sandbox", &self.sandbox)
            .field("mapping", &self.mapping)
            .field("current_db", &self.current_db)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl SandboxBuilder {
    pub fn new(sandbox: Connector, config: SandboxConfig) -> Self {
        Self {
            sandbox,
            mapping: ShadowMapping::new(),
            current_db: None,
            last_error: None,
            sampler: None,
            parser: SqlParser::new(),
            config,
        }
    }

    /// Samples every mirrored table through `sampler`.
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn sandbox(&self) -> &Connector {
        &self.sandbox
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn sampler(&self) -> Option<&Sampler> {
        self.sampler.as_ref()
    }

    pub fn mapping(&self) -> &ShadowMapping {
        &self.mapping
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current_db.as_deref()
    }

    /// Most recent shadow DDL failure of the last [`build`](Self::build),
    /// whether from the statement itself or from mirroring what it references.
    pub fn last_error(&self) -> Option<&SbxError> {
        self.last_error.as_ref()
    }

    pub fn take_last_error(&mut self) -> Option<SbxError> {
        self.last_error.take()
    }

    /// Shadow name of `logical`; unmapped names pass through.
    pub fn shadow_of(&self, logical: &str) -> String {
        self.mapping
            .shadow_of(logical)
            .unwrap_or(logical)
            .to_string()
    }

    /// Logical name of `shadow`; unmapped names pass through.
    pub fn real_db(&self, shadow: &str) -> String {
        match self.mapping.logical_of(shadow) {
            Some(logical) => logical.to_string(),
            None => {
                if shadow.starts_with(&format!("{}_", self.config.prefix)) {
                    warn!(shadow, "shadow database missing from mapping");
                }
                shadow.to_string()
            }
        }
    }

    /// Sandbox connector aimed at the shadow of `logical`.
    pub fn sandbox_for(&self, logical: &str) -> Connector {
        self.sandbox.with_schema(&self.shadow_of(logical))
    }

    /// Mirrors everything `statements` touch.
    ///
    /// `Err` only for the fatal class; any other per-statement failure is
    /// logged and the batch goes on. A `USE` ends the batch.
    pub async fn build(&mut self, source: &Connector, statements: &[&str]) -> SbxResult<()> {
        self.last_error = None;
        if self.sandbox.is_disabled() {
            info!("sandbox disabled, nothing to build");
            return Ok(());
        }

        let logical = self
            .current_db
            .get_or_insert_with(|| source.database().to_string())
            .clone();
        let mut source = source.with_schema(&logical);
        self.ensure_database(&source).await?;

        for sql in statements {
            debug!(sql, "build");
            match self.process(&mut source, sql).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(sql, error = %e, "statement not mirrored"),
            }
        }
        Ok(())
    }

    async fn process(&mut self, source: &mut Connector, sql: &str) -> SbxResult<Flow> {
        let parsed = self.parser.analyze(sql)?;
        match parsed.kind {
            StatementKind::Use => {
                if let Some(db) = &parsed.use_database {
                    self.current_db = Some(db.clone());
                    *source = source.with_schema(db);
                    self.ensure_database(source).await?;
                }
                Ok(Flow::Stop)
            }
            StatementKind::Ddl => {
                self.apply_ddl(source, &parsed).await?;
                Ok(Flow::Continue)
            }
            _ => {
                self.mirror_references(source, &parsed).await?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Mirrors the current definition of the DDL's objects, then runs the
    /// DDL verbatim in the shadow.
    async fn apply_ddl(&mut self, source: &Connector, parsed: &ParsedStatement) -> SbxResult<()> {
        if let Some(table) = parsed.qualified_ddl_object() {
            return Err(SbxError::UnsupportedQualifier {
                table: table.to_string(),
            });
        }
        let shadow = self.ensure_database(source).await?;

        for target in &parsed.ddl_targets {
            // a CREATE target does not exist on the source yet
            match self.mirror_table(source, &target.table).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(table = %target.table, error = %e, "DDL target not mirrored");
                    self.note_failure(e);
                }
            }
        }
        self.mirror_references(source, parsed).await?;

        let conn = self.sandbox.with_schema(&shadow);
        match conn.execute(&parsed.sql).await {
            Ok(_) => {
                // later statements see the shadow's version of these objects
                for target in parsed.ddl_targets.iter().chain(&parsed.ddl_destinations) {
                    self.mapping.mark_created(&shadow, &target.table);
                }
                Ok(())
            }
            Err(SbxError::Driver(message)) => {
                warn!(shadow = %shadow, %message, "DDL failed in sandbox");
                self.last_error = Some(SbxError::SandboxDdl {
                    sql: parsed.sql.clone(),
                    message,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Keeps a failed shadow DDL as the builder's `LastError`.
    fn note_failure(&mut self, error: SbxError) {
        if matches!(error, SbxError::SandboxDdl { .. }) {
            self.last_error = Some(error);
        }
    }

    /// Mirrors every table `parsed` references. Only a fatal error stops
    /// the remaining tables.
    fn mirror_references<'a>(
        &'a mut self,
        source: &'a Connector,
        parsed: &'a ParsedStatement,
    ) -> BoxFuture<'a, SbxResult<()>> {
        Box::pin(async move {
            for table in &parsed.tables {
                let conn = match &table.database {
                    Some(db) => source.with_schema(db),
                    None => source.clone(),
                };
                match self.mirror_table(&conn, &table.table).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(database = %conn.database(), table = %table.table, error = %e, "table not mirrored");
                        self.note_failure(e);
                    }
                }
            }
            Ok(())
        })
    }

    /// Mirrors one table or view of `source`'s database; no-op once done.
    pub async fn mirror_table(&mut self, source: &Connector, table: &str) -> SbxResult<()> {
        if table.eq_ignore_ascii_case("dual") {
            return Ok(());
        }
        let shadow = self.ensure_database(source).await?;
        if self.mapping.is_created(&shadow, table) {
            debug!(shadow = %shadow, table, "already mirrored");
            return Ok(());
        }

        let status = source.show_table_status(table).await?;
        if status.is_view() {
            self.create_view(source, &shadow, table).await
        } else {
            self.create_table(source, &shadow, table).await
        }
    }

    async fn create_table(&mut self, source: &Connector, shadow: &str, table: &str) -> SbxResult<()> {
        self.mapping.mark_created(shadow, table);
        let ddl = source.show_create_table(table).await?;
        let conn = self.sandbox.with_schema(shadow);
        conn.execute(&ddl).await.map_err(|e| SbxError::SandboxDdl {
            sql: ddl.clone(),
            message: e.to_string(),
        })?;
        info!(database = %source.database(), shadow, table, "table mirrored");

        if let Some(sampler) = &self.sampler {
            match sampler.sample(source, &conn, &[table]).await {
                Ok(report) => debug!(table, rows = report.inserted(), "sampled"),
                Err(e) => warn!(table, error = %e, "sampling failed"),
            }
        }
        Ok(())
    }

    /// Mirrors a view's dependencies, then the view itself.
    async fn create_view(&mut self, source: &Connector, shadow: &str, view: &str) -> SbxResult<()> {
        self.mapping.mark_created(shadow, view);
        let ddl = source.show_create_table(view).await?;
        let body = view_body(&ddl)
            .ok_or_else(|| SbxError::Driver(format!("no defining query in view {view}")))?;
        let parsed = self.parser.analyze(body)?;
        self.mirror_references(source, &parsed).await?;

        let ddl = self.rewrite_view_ddl(&ddl)?;
        let conn = self.sandbox.with_schema(shadow);
        conn.execute(&ddl).await.map_err(|e| SbxError::SandboxDdl {
            sql: ddl.clone(),
            message: e.to_string(),
        })?;
        info!(database = %source.database(), shadow, view, "view mirrored");
        Ok(())
    }

    /// Drops `DEFINER=` and points mapped qualifiers at their shadows.
    fn rewrite_view_ddl(&self, ddl: &str) -> SbxResult<String> {
        let mut ddl = definer_pattern()?.replace_all(ddl, "").into_owned();
        for (logical, shadow) in self.mapping.pairs() {
            ddl = ddl.replace(
                &format!("{}.", quote_ident(logical)),
                &format!("{}.", quote_ident(shadow)),
            );
        }
        Ok(ddl)
    }

    /// Shadow database of `source`'s logical database, created on first use.
    ///
    /// Failing to create it is fatal; a timeout stays a timeout.
    pub async fn ensure_database(&mut self, source: &Connector) -> SbxResult<String> {
        let logical = source.database().to_string();
        if let Some(shadow) = self.mapping.shadow_of(&logical) {
            return Ok(shadow.to_string());
        }

        let shadow = shadow_name(&self.config.prefix, Utc::now());
        let quoted = quote_ident(&logical);
        let fallback = || {
            format!(
                "create database {} character set {}",
                quote_ident(&shadow),
                source.dsn().charset
            )
        };
        let ddl = match source.show_create_database(&logical).await {
            Ok(ddl) if ddl.contains(&quoted) => ddl.replacen(&quoted, &quote_ident(&shadow), 1),
            Ok(_) => fallback(),
            Err(e) => {
                warn!(database = %logical, error = %e, "show create database failed");
                fallback()
            }
        };

        self.sandbox.execute(&ddl).await.map_err(|e| match e {
            SbxError::Timeout { .. } => e,
            other => SbxError::Fatal(format!("cannot create shadow database {shadow} for {logical}: {other}")),
        })?;
        self.mapping.insert(&logical, &shadow);
        info!(database = %logical, shadow = %shadow, "shadow database created");
        Ok(shadow)
    }

    /// Column model of every table `parsed` references, read from the shadows.
    ///
    /// Only referenced columns are kept unless the statement selects `*`.
    pub async fn table_columns(&self, parsed: &ParsedStatement) -> SbxResult<Meta> {
        let current = self.current_db.clone().unwrap_or_default();
        let mut meta = Meta::new();
        for table in &parsed.tables {
            let logical = table.database.clone().unwrap_or_else(|| current.clone());
            let columns = match self.sandbox_for(&logical).show_columns(&table.table).await {
                Ok(columns) => columns,
                Err(e) => {
                    warn!(database = %logical, table = %table.table, error = %e, "columns unavailable");
                    continue;
                }
            };
            let wanted: HashSet<String> = parsed
                .columns_of(table)
                .map(str::to_ascii_lowercase)
                .collect();
            let keep_all = parsed.wildcard || wanted.is_empty();

            let entry = meta.table_mut(&logical, &table.table);
            for mut column in columns {
                if keep_all || wanted.contains(&column.name.to_ascii_lowercase()) {
                    column.database = logical.clone();
                    entry.columns.push(column);
                }
            }
        }
        Ok(meta)
    }

    /// Fills column cardinality from `source` (never from the sample).
    pub async fn fill_cardinality(&self, source: &Connector, meta: &mut Meta, max_total_rows: u64) {
        for db in meta.databases.values_mut() {
            let conn = source.with_schema(&db.name);
            for table in db.tables.values_mut() {
                for column in &mut table.columns {
                    let cardinality = conn.column_cardinality(&table.name, &column.name, max_total_rows).await;
                    column.cardinality = Some(cardinality);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorSettings, Dsn, MemoryBackend, ResultSet};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryBackend>, Connector, SandboxBuilder) {
        let backend = Arc::new(MemoryBackend::new());
        let settings = ConnectorSettings {
            sandbox_addr: "sandbox:3306".to_string(),
            ..ConnectorSettings::default()
        };
        let source = Connector::new(Dsn::new("prod:3306", "ro", "", "world"), settings.clone(), backend.clone());
        let sandbox = Connector::new(Dsn::new("sandbox:3306", "root", "", ""), settings, backend.clone());
        (backend, source, SandboxBuilder::new(sandbox, SandboxConfig::default()))
    }

    fn table_status(backend: &MemoryBackend, table: &str, comment: &str) {
        backend.respond_on(
            "prod:3306",
            &format!("where name = '{table}'"),
            ResultSet::from_text(&["Name", "Rows", "Comment"], &[&[Some(table), Some("10"), Some(comment)]]),
        );
    }

    fn create_table(backend: &MemoryBackend, table: &str, ddl: &str) {
        backend.respond_on(
            "prod:3306",
            &format!("show create table `world`.`{table}`"),
            ResultSet::from_text(&["Table", "Create Table"], &[&[Some(table), Some(ddl)]]),
        );
    }

    #[test]
    fn test_view_body() {
        let ddl = "CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`%` SQL SECURITY DEFINER VIEW `v` AS select `world`.`city`.`id` AS `id` from `world`.`city`";
        assert_eq!(view_body(ddl), Some("select `world`.`city`.`id` AS `id` from `world`.`city`"));
        assert_eq!(view_body("CREATE TABLE t (id int)"), None);
    }

    #[tokio::test]
    async fn test_database_is_created_once() {
        let (backend, source, mut builder) = setup();
        let first = builder.ensure_database(&source).await.unwrap();
        let second = builder.ensure_database(&source).await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("optimizer_"));
        let creates = backend
            .executed_on("sandbox:3306")
            .iter()
            .filter(|sql| sql.starts_with("create database"))
            .count();
        assert_eq!(creates, 1);
        assert_eq!(builder.shadow_of("world"), first);
        assert_eq!(builder.real_db(&first), "world");
        assert_eq!(builder.real_db("other"), "other");
    }

    #[tokio::test]
    async fn test_show_create_database_is_renamed() {
        let (backend, source, mut builder) = setup();
        backend.respond_on(
            "prod:3306",
            "show create database `world`",
            ResultSet::from_text(
                &["Database", "Create Database"],
                &[&[Some("world"), Some("CREATE DATABASE `world` /*!40100 DEFAULT CHARACTER SET utf8mb4 */")]],
            ),
        );
        let shadow = builder.ensure_database(&source).await.unwrap();
        let expected = format!("CREATE DATABASE `{shadow}` /*!40100 DEFAULT CHARACTER SET utf8mb4 */");
        assert!(backend.executed_on("sandbox:3306").contains(&expected));
    }

    #[tokio::test]
    async fn test_shadow_creation_failure_is_fatal() {
        let (backend, source, mut builder) = setup();
        backend.fail_on("sandbox:3306", "create database", "Access denied");
        let err = builder.build(&source, &["select * from city"]).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_view_is_rewritten_into_shadow() {
        let (backend, source, mut builder) = setup();
        table_status(&backend, "v_city", "VIEW");
        table_status(&backend, "city", "");
        create_table(
            &backend,
            "v_city",
            "CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`%` SQL SECURITY DEFINER VIEW `v_city` AS select `world`.`city`.`id` AS `id` from `world`.`city`",
        );
        create_table(&backend, "city", "CREATE TABLE `city` (\n  `id` int NOT NULL\n)");

        builder.build(&source, &["select id from v_city"]).await.unwrap();
        let shadow = builder.shadow_of("world");
        let sandbox_log = backend.executed_on("sandbox:3306");

        assert!(sandbox_log.contains(&"CREATE TABLE `city` (\n  `id` int NOT NULL\n)".to_string()));
        let view_ddl = sandbox_log
            .iter()
            .find(|sql| sql.contains("VIEW `v_city`"))
            .unwrap();
        assert!(!view_ddl.contains("DEFINER=`root`"));
        assert!(view_ddl.contains("SQL SECURITY DEFINER"));
        assert!(view_ddl.contains(&format!("from `{shadow}`.`city`")));
        assert!(builder.mapping().is_created(&shadow, "city"));
        assert!(builder.mapping().is_created(&shadow, "v_city"));
    }

    #[tokio::test]
    async fn test_use_switches_database_and_stops_batch() {
        let (backend, source, mut builder) = setup();
        builder
            .build(&source, &["use sakila", "select * from film"])
            .await
            .unwrap();
        assert_eq!(builder.current_database(), Some("sakila"));
        assert_ne!(builder.shadow_of("sakila"), "sakila");
        assert_eq!(backend.count_matching("show table status"), 0);
    }

    #[tokio::test]
    async fn test_disabled_sandbox_is_a_no_op() {
        let (backend, source, builder) = setup();
        let mut builder = SandboxBuilder::new(builder.sandbox().disabled(), SandboxConfig::default());
        builder.build(&source, &["select * from city"]).await.unwrap();
        assert!(backend.executed().is_empty());
    }

    #[tokio::test]
    async fn test_table_columns_keeps_referenced_columns() {
        let (backend, source, mut builder) = setup();
        table_status(&backend, "city", "");
        create_table(&backend, "city", "CREATE TABLE `city` (`id` int, `name` char(35), `country_id` int)");
        backend.respond_on(
            "sandbox:3306",
            "show full columns",
            ResultSet::from_text(
                &["Field", "Type", "Collation", "Null", "Key", "Default", "Extra", "Comment"],
                &[
                    &[Some("id"), Some("int"), None, Some("NO"), Some("PRI"), None, Some(""), Some("")],
                    &[Some("name"), Some("char(35)"), Some("utf8mb4_general_ci"), Some("NO"), Some(""), Some(""), Some(""), Some("")],
                    &[Some("country_id"), Some("int"), None, Some("YES"), Some("MUL"), None, Some(""), Some("")],
                ],
            ),
        );
        let sql = "select name from city where country_id = 44";
        builder.build(&source, &[sql]).await.unwrap();

        let parsed = SqlParser::new().analyze(sql).unwrap();
        let meta = builder.table_columns(&parsed).await.unwrap();
        let city = meta.table("world", "city").unwrap();
        let names: Vec<&str> = city.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "country_id"]);
        assert_eq!(city.columns[0].database, "world");
        assert_eq!(city.columns[0].character_set, "utf8mb4");
    }
}
