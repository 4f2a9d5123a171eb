// Sandbox 통합 테스트
//
// 종단 간: source 스키마 → shadow database → EXPLAIN → Annotator

use futures::FutureExt;
use proptest::prelude::*;
use sbx_core::connector::{ConnectorSettings, Dsn, MemoryBackend, ResultSet};
use sbx_core::explain::{Annotator, AnnotatorConfig, ExplainConfig, FindingKind};
use sbx_core::sampling::{Sampler, SamplingConfig};
use sbx_core::sandbox::{SandboxConfig, run_until_shutdown};
use sbx_core::{Connector, SandboxBuilder, SbxError};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

// ─── Helpers ────────────────────────────────────────────

const SOURCE: &str = "prod:3306";
const SANDBOX: &str = "sandbox:3306";

const CITY_DDL: &str = "CREATE TABLE `city` (
  `id` int NOT NULL AUTO_INCREMENT,
  `name` char(35) NOT NULL DEFAULT '',
  `country_id` int NOT NULL,
  PRIMARY KEY (`id`),
  KEY `idx_country` (`country_id`),
  CONSTRAINT `city_ibfk_1` FOREIGN KEY (`country_id`) REFERENCES `country` (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

const COUNTRY_DDL: &str = "CREATE TABLE `country` (
  `id` int NOT NULL,
  `code` char(3) NOT NULL,
  PRIMARY KEY (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

struct World {
    backend: Arc<MemoryBackend>,
    source: Connector,
    sandbox: Connector,
}

impl World {
    fn new() -> Self {
        sbx_core::logging::init_test();
        let backend = Arc::new(MemoryBackend::new());
        let settings = ConnectorSettings {
            sandbox_addr: SANDBOX.to_string(),
            ..ConnectorSettings::default()
        };
        let source = Connector::new(Dsn::new(SOURCE, "ro", "", "world"), settings.clone(), backend.clone());
        let sandbox = Connector::new(Dsn::new(SANDBOX, "root", "", ""), settings, backend.clone());

        let world = Self {
            backend,
            source,
            sandbox,
        };
        world.table("city", "4079", CITY_DDL);
        world.table("country", "239", COUNTRY_DDL);
        world
    }

    fn table(&self, name: &str, rows: &str, ddl: &str) {
        self.backend.respond_on(
            SOURCE,
            &format!("where name = '{name}'"),
            ResultSet::from_text(&["Name", "Engine", "Rows", "Comment"], &[&[Some(name), Some("InnoDB"), Some(rows), Some("")]]),
        );
        self.backend.respond_on(
            SOURCE,
            &format!("show create table `world`.`{name}`"),
            ResultSet::from_text(&["Table", "Create Table"], &[&[Some(name), Some(ddl)]]),
        );
    }

    fn builder(&self) -> SandboxBuilder {
        SandboxBuilder::new(self.sandbox.clone(), SandboxConfig::default())
    }

    fn sandbox_log(&self) -> Vec<String> {
        self.backend.executed_on(SANDBOX)
    }

    fn shadow_creates(&self) -> usize {
        self.sandbox_log()
            .iter()
            .filter(|sql| sql.to_ascii_lowercase().starts_with("create database"))
            .count()
    }
}

// ═══════════════════════════════════════════════════════════
// 종단 간
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn test_city_country_end_to_end() {
    let world = World::new();
    let sql = "SELECT c.name FROM city c JOIN country co ON c.country_id = co.id WHERE co.code = 'KOR'";

    let mut builder = world.builder();
    builder.build(&world.source, &[sql]).await.unwrap();
    let shadow = builder.shadow_of("world");
    assert!(shadow.starts_with("optimizer_"));
    assert!(builder.last_error().is_none());

    // foreign keys never reach the sandbox
    let log = world.sandbox_log();
    let city = log.iter().find(|s| s.starts_with("CREATE TABLE `city`")).unwrap();
    assert!(!city.contains("CONSTRAINT"));
    assert!(city.contains("KEY `idx_country` (`country_id`)\n)"));
    assert!(log.iter().any(|s| s.starts_with("CREATE TABLE `country`")));

    // nothing but reads on the source
    for sql in world.backend.executed_on(SOURCE) {
        assert!(!sbx_core::connector::guard::is_dangerous(&sql), "{sql}");
    }

    world.backend.respond_on(
        SANDBOX,
        "select @@version",
        ResultSet::from_text(&["@@version"], &[&[Some("8.0.32")]]),
    );
    world.backend.respond_on(
        SANDBOX,
        "explain select",
        ResultSet::from_text(
            &["id", "select_type", "table", "partitions", "type", "possible_keys", "key", "key_len", "ref", "rows", "filtered", "Extra"],
            &[
                &[Some("1"), Some("SIMPLE"), Some("co"), None, Some("ALL"), Some("PRIMARY"), None, None, None, Some("239"), Some("10.00"), Some("Using where")],
                &[Some("1"), Some("SIMPLE"), Some("c"), None, Some("ref"), Some("idx_country"), Some("idx_country"), Some("4"), Some("world.co.id"), Some("17"), Some("100.00"), None],
            ],
        ),
    );

    let info = builder
        .sandbox_for("world")
        .explain(sql, &ExplainConfig::default())
        .await
        .unwrap();
    assert_eq!(info.rows.len(), 2);
    assert_eq!(info.rows[1].r#ref, vec!["world.co.id".to_string()]);

    let findings = Annotator::new(AnnotatorConfig::default()).annotate(&info);
    let access: Vec<_> = findings
        .iter()
        .filter(|f| f.kind == FindingKind::AccessType && f.is_warning())
        .collect();
    assert_eq!(access.len(), 1);
    assert_eq!(access[0].subject, "ALL");

    assert_eq!(builder.teardown().await, 1);
}

#[tokio::test]
async fn test_indexed_lookup_is_not_flagged() {
    let world = World::new();
    let sql = "SELECT * FROM city WHERE country_id = 44";
    let mut builder = world.builder();
    builder.build(&world.source, &[sql]).await.unwrap();

    world.backend.respond_on(
        SANDBOX,
        "select @@version",
        ResultSet::from_text(&["@@version"], &[&[Some("5.7.40")]]),
    );
    world.backend.respond_on(
        SANDBOX,
        "explain select",
        ResultSet::from_text(
            &["id", "select_type", "table", "partitions", "type", "possible_keys", "key", "key_len", "ref", "rows", "filtered", "Extra"],
            &[&[Some("1"), Some("SIMPLE"), Some("city"), None, Some("ref"), Some("idx_country"), Some("idx_country"), Some("4"), Some("const"), Some("17"), Some("100.00"), None]],
        ),
    );
    let info = builder
        .sandbox_for("world")
        .explain(sql, &ExplainConfig::default())
        .await
        .unwrap();
    assert_eq!(info.rows.len(), 1);
    assert_eq!(info.rows[0].table, "city");

    let findings = Annotator::new(AnnotatorConfig::default()).annotate(&info);
    assert!(findings.iter().all(|f| !f.is_warning()), "{findings:?}");
}

#[tokio::test]
async fn test_repeated_builds_create_one_shadow() {
    let world = World::new();
    let mut builder = world.builder();
    builder.build(&world.source, &["select * from city"]).await.unwrap();
    builder
        .build(&world.source, &["select * from city where id = 1", "select * from country"])
        .await
        .unwrap();

    assert_eq!(world.shadow_creates(), 1);
    let city_creates = world
        .sandbox_log()
        .iter()
        .filter(|s| s.starts_with("CREATE TABLE `city`"))
        .count();
    assert_eq!(city_creates, 1);
}

#[tokio::test]
async fn test_builders_get_distinct_shadows() {
    let world = World::new();
    let mut first = world.builder();
    let mut second = world.builder();
    let (a, b) = tokio::join!(
        first.build(&world.source, &["select * from city"]),
        second.build(&world.source, &["select * from city"]),
    );
    a.unwrap();
    b.unwrap();

    assert_ne!(first.shadow_of("world"), second.shadow_of("world"));
    assert_eq!(world.shadow_creates(), 2);
}

// ═══════════════════════════════════════════════════════════
// DDL
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn test_ddl_conflict_is_recorded() {
    let world = World::new();
    world
        .backend
        .fail_on(SANDBOX, "add index idx_country", "Duplicate key name 'idx_country'");
    let mut builder = world.builder();

    let ddl = "ALTER TABLE city ADD INDEX idx_country (country_id)";
    builder
        .build(&world.source, &[ddl, "select * from country"])
        .await
        .unwrap();

    match builder.last_error() {
        Some(SbxError::SandboxDdl { sql, message }) => {
            assert_eq!(sql, ddl);
            assert!(message.contains("Duplicate key name"));
        }
        other => panic!("unexpected last error {other:?}"),
    }
    // the batch went on
    assert!(world.sandbox_log().iter().any(|s| s.starts_with("CREATE TABLE `country`")));

    builder.build(&world.source, &["select 1"]).await.unwrap();
    assert!(builder.last_error().is_none());
}

#[tokio::test]
async fn test_ddl_runs_verbatim_in_shadow() {
    let world = World::new();
    let mut builder = world.builder();
    let ddl = "ALTER TABLE city ADD INDEX idx_name (name)";
    builder.build(&world.source, &[ddl]).await.unwrap();

    let executed = world.backend.executed();
    let alter = executed.iter().find(|e| e.sql == ddl).unwrap();
    assert_eq!(alter.addr, SANDBOX);
    assert_eq!(alter.database, builder.shadow_of("world"));
    assert!(builder.last_error().is_none());
}

#[tokio::test]
async fn test_failed_mirror_is_recorded() {
    let world = World::new();
    world
        .backend
        .fail_on(SANDBOX, "create table `country`", "Unknown character set: 'utf8mb4'");
    let mut builder = world.builder();
    builder
        .build(&world.source, &["select * from city join country on city.country_id = country.id"])
        .await
        .unwrap();

    match builder.last_error() {
        Some(SbxError::SandboxDdl { sql, message }) => {
            assert!(sql.starts_with("CREATE TABLE `country`"));
            assert!(message.contains("Unknown character set"));
        }
        other => panic!("unexpected last error {other:?}"),
    }
    assert!(world.sandbox_log().iter().any(|s| s.starts_with("CREATE TABLE `city`")));
}

#[tokio::test]
async fn test_failed_ddl_dependency_is_recorded() {
    let world = World::new();
    world
        .backend
        .fail_on(SANDBOX, "create table `city`", "Unknown character set: 'utf8mb4'");
    let mut builder = world.builder();
    builder
        .build(&world.source, &["ALTER TABLE city ADD INDEX idx_name (name)"])
        .await
        .unwrap();

    assert!(matches!(
        builder.last_error(),
        Some(SbxError::SandboxDdl { sql, .. }) if sql.starts_with("CREATE TABLE `city`")
    ));
}

#[tokio::test]
async fn test_qualified_ddl_is_fatal() {
    let world = World::new();
    let mut builder = world.builder();
    let err = builder
        .build(&world.source, &["ALTER TABLE world.city ADD INDEX i (name)", "select * from country"])
        .await
        .unwrap_err();

    assert!(matches!(err, SbxError::UnsupportedQualifier { .. }));
    assert!(err.is_fatal());
    assert!(!world.sandbox_log().iter().any(|s| s.contains("`country`")));
}

#[tokio::test]
async fn test_missing_table_is_not_fatal() {
    let world = World::new();
    let mut builder = world.builder();
    builder
        .build(&world.source, &["select * from nowhere", "select * from city"])
        .await
        .unwrap();
    assert!(world.sandbox_log().iter().any(|s| s.starts_with("CREATE TABLE `city`")));
}

// ═══════════════════════════════════════════════════════════
// Sampling
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn test_sampling_stops_at_desired_rows() {
    let world = World::new();
    let ids: Vec<String> = (0..350).map(|i| i.to_string()).collect();
    let rows: Vec<[Option<&str>; 2]> = ids.iter().map(|id| [Some(id.as_str()), Some("x")]).collect();
    let refs: Vec<&[Option<&str>]> = rows.iter().map(|r| r.as_slice()).collect();
    world.backend.respond_on(
        SOURCE,
        "select * from `world`.`city`",
        ResultSet::from_text(&["id", "name"], &refs),
    );

    let sampler = Sampler::new(SamplingConfig {
        enabled: true,
        statistic_target: 1,
        batch_rows: 100,
        ..SamplingConfig::default()
    });
    let mut builder = world.builder().with_sampler(sampler);
    builder.build(&world.source, &["select * from city"]).await.unwrap();

    let shadow = builder.shadow_of("world");
    let inserts: Vec<String> = world
        .sandbox_log()
        .into_iter()
        .filter(|s| s.starts_with(&format!("INSERT INTO `{shadow}`.`city`")))
        .collect();
    assert_eq!(inserts.len(), 3);
    assert!(
        world
            .backend
            .executed_on(SOURCE)
            .iter()
            .any(|s| s.contains("WHERE RAND() <= 0.073547 LIMIT 300"))
    );
}

// ═══════════════════════════════════════════════════════════
// Teardown
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn test_teardown_after_panic() {
    let world = World::new();
    let mut builder = world.builder();
    let source = world.source.clone();

    let outcome = AssertUnwindSafe(run_until_shutdown(&mut builder, async |b: &mut SandboxBuilder| {
        b.build(&source, &["select * from city"]).await.ok();
        None::<u32>.expect("review crashed")
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert!(builder.mapping().is_empty());
    assert_eq!(world.backend.count_matching("drop database if exists"), 1);
}

#[tokio::test]
async fn test_disabled_sandbox_builds_nothing() {
    let world = World::new();
    let mut builder = SandboxBuilder::new(world.sandbox.disabled(), SandboxConfig::default());
    builder.build(&world.source, &["select * from city"]).await.unwrap();
    assert!(world.backend.executed().is_empty());
    assert_eq!(builder.teardown().await, 0);
}

// ═══════════════════════════════════════════════════════════
// Safety gate
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn test_source_refuses_writes_before_io() {
    let world = World::new();
    let err = world.source.execute("DROP TABLE city").await.unwrap_err();
    assert!(matches!(err, SbxError::Denied { .. }));
    assert!(world.backend.executed().is_empty());
}

proptest! {
    #[test]
    fn prop_source_never_receives_writes(
        verb in prop::sample::select(vec!["insert into", "update", "delete from", "drop table", "create table", "alter table", "truncate", "replace into", "set"]),
        tail in "[a-z_ ]{0,20}",
        wrap in prop::sample::select(vec!["{}", "/* note */ {}", "-- note\n{}", "/*!50000 {} */", "select 1; /*! {} */", "(select 1); {}", "select /*!40001 1; {} */"]),
    ) {
        let world = World::new();
        let sql = wrap.replace("{}", &format!("{verb} city {tail}"));
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let result = runtime.block_on(world.source.execute(&sql));
        prop_assert!(matches!(result, Err(SbxError::Denied { .. })), "expected Denied");
        prop_assert!(world.backend.executed().is_empty());
    }
}
