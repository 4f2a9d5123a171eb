// Plan Parser 통합 테스트
//
// 세 가지 입력 형태 → 동일한 PlanRow 목록

use proptest::prelude::*;
use sbx_core::SbxError;
use sbx_core::explain::{PlanRow, PlanShape, VERTICAL_MIN_LINES, detect_shape, parse_explain_text, parse_plan};

// ─── Helpers ────────────────────────────────────────────

const TABULAR: &str = "\
+----+-------------+---------+------------+------+---------------+-------------+---------+---------------+------+----------+-------------+
| id | select_type | table   | partitions | type | possible_keys | key         | key_len | ref           | rows | filtered | Extra       |
+----+-------------+---------+------------+------+---------------+-------------+---------+---------------+------+----------+-------------+
|  1 | SIMPLE      | country | NULL       | ALL  | PRIMARY       | NULL        | NULL    | NULL          |  239 |    10.00 | Using where |
|  1 | SIMPLE      | city    | NULL       | ref  | idx_country   | idx_country | 4       | world.country.id |   17 |   100.00 | NULL        |
+----+-------------+---------+------------+------+---------------+-------------+---------+---------------+------+----------+-------------+
2 rows in set, 1 warning (0.00 sec)";

const VERTICAL: &str = "\
*************************** 1. row ***************************
           id: 1
  select_type: SIMPLE
        table: country
   partitions: NULL
         type: ALL
possible_keys: PRIMARY
          key: NULL
      key_len: NULL
          ref: NULL
         rows: 239
     filtered: 10.00
        Extra: Using where
*************************** 2. row ***************************
           id: 1
  select_type: SIMPLE
        table: city
   partitions: NULL
         type: ref
possible_keys: idx_country
          key: idx_country
      key_len: 4
          ref: world.country.id
         rows: 17
     filtered: 100.00
        Extra: NULL
2 rows in set, 1 warning (0.00 sec)";

const JSON: &str = r#"{
  "query_block": {
    "select_id": 1,
    "cost_info": { "query_cost": "30.42" },
    "nested_loop": [
      { "table": { "table_name": "country", "access_type": "ALL", "possible_keys": ["PRIMARY"],
                   "rows_examined_per_scan": 239, "filtered": "10.00",
                   "attached_condition": "(`world`.`country`.`code` = 'KOR')" } },
      { "table": { "table_name": "city", "access_type": "ref", "possible_keys": ["idx_country"],
                   "key": "idx_country", "key_length": "4", "ref": ["world.country.id"],
                   "rows_examined_per_scan": 17, "filtered": "100.00" } }
    ]
  }
}"#;

/// Fields every shape carries.
fn essentials(row: &PlanRow) -> (Option<u32>, &str, &str, &[String], &str, &str, &[String], u64, f64, &str, &str) {
    (
        row.id,
        row.table.as_str(),
        row.access_type.as_str(),
        row.possible_keys.as_slice(),
        row.key.as_str(),
        row.key_len.as_str(),
        row.r#ref.as_slice(),
        row.rows,
        row.filtered,
        row.extra.as_str(),
        row.scalability.as_str(),
    )
}

fn tabular_with_filtered(filtered: &str) -> String {
    format!(
        "+----+-------+------+------+----------+-------+\n\
         | id | table | type | rows | filtered | Extra |\n\
         +----+-------+------+------+----------+-------+\n\
         |  1 | city  | ALL  | 4079 | {filtered} | NULL  |\n\
         +----+-------+------+------+----------+-------+"
    )
}

// ═══════════════════════════════════════════════════════════
// 형태 독립성
// ═══════════════════════════════════════════════════════════

#[test]
fn test_three_shapes_agree() {
    let tabular = parse_plan(TABULAR, None).unwrap();
    let vertical = parse_plan(VERTICAL, None).unwrap();
    let json = parse_plan(JSON, None).unwrap();

    assert_eq!(tabular.len(), 2);
    for ((t, v), j) in tabular.iter().zip(&vertical).zip(&json) {
        assert_eq!(essentials(t), essentials(v));
        assert_eq!(essentials(t), essentials(j));
    }
    assert_eq!(tabular, vertical);
    assert_eq!(tabular[0].scalability, "O(n)");
    assert_eq!(tabular[1].scalability, "O(log n)");
}

#[test]
fn test_explain_text_keeps_json_cost() {
    let info = parse_explain_text(JSON).unwrap();
    assert_eq!(info.query_cost, Some(30.42));
    assert_eq!(info.rows.len(), 2);

    let info = parse_explain_text(TABULAR).unwrap();
    assert_eq!(info.query_cost, None);
}

#[test]
fn test_filtered_above_hundred_is_clamped() {
    for shape in [
        tabular_with_filtered("130.00"),
        VERTICAL.replacen("filtered: 10.00", "filtered: 130.00", 1),
        JSON.replacen("\"10.00\"", "\"130.00\"", 1),
    ] {
        let rows = parse_plan(&shape, None).unwrap();
        assert_eq!(rows[0].filtered, 100.0);
    }
}

#[test]
fn test_vertical_needs_minimum_lines() {
    let lines: Vec<&str> = VERTICAL.lines().take(VERTICAL_MIN_LINES - 1).collect();
    let err = parse_plan(&lines.join("\n"), Some(PlanShape::Vertical)).unwrap_err();
    assert!(matches!(err, SbxError::PlanParse(_)));
}

#[test]
fn test_unknown_input_is_rejected() {
    assert!(matches!(detect_shape("EXPLAIN select 1"), Err(SbxError::PlanParse(_))));
    assert!(matches!(parse_plan("", None), Err(SbxError::PlanParse(_))));
    assert!(matches!(parse_plan("{\"query_block\": [", None), Err(_)));
}

// ═══════════════════════════════════════════════════════════
// Property
// ═══════════════════════════════════════════════════════════

fn nested_json(tables: &[String]) -> String {
    let items: Vec<String> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| {
            format!(
                r#"{{"table": {{"table_name": "{t}", "access_type": "ref", "rows_examined_per_scan": {}, "filtered": "50.00"}}}}"#,
                i + 1
            )
        })
        .collect();
    format!(
        r#"{{"query_block": {{"select_id": 1, "nested_loop": [{}]}}}}"#,
        items.join(",")
    )
}

proptest! {
    #[test]
    fn prop_nested_loop_yields_one_row_per_table(tables in prop::collection::vec("[a-z]{1,10}", 1..12)) {
        let rows = parse_plan(&nested_json(&tables), None).unwrap();
        prop_assert_eq!(rows.len(), tables.len());
        for (i, (row, table)) in rows.iter().zip(&tables).enumerate() {
            prop_assert_eq!(&row.table, table);
            prop_assert_eq!(row.rows, i as u64 + 1);
            prop_assert_eq!(row.id, Some(1));
        }
    }

    #[test]
    fn prop_filtered_always_in_range(value in -1000.0f64..1000.0) {
        let rows = parse_plan(&tabular_with_filtered(&format!("{value:.2}")), None).unwrap();
        prop_assert!((0.0..=100.0).contains(&rows[0].filtered));
    }
}
