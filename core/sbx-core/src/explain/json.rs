//! `EXPLAIN FORMAT=JSON` as a typed tree.
//!
//! The document is decoded into [`PlanNode`]s in document order, then
//! flattened by a [`PlanVisitor`]. Every `table` object found at any depth
//! yields exactly one [`PlanRow`], in depth-first encounter order. Keys
//! outside the known vocabulary are still descended into, so no nesting
//! level is missed.

use super::model::{PlanRow, clamp_filtered, complexity, null_if_empty};
use crate::error::{SbxError, SbxResult};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::trace;

/// Subquery and materialization containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubqueryKind {
    Attached,
    OptimizedAway,
    OrderBy,
    GroupBy,
    Having,
    SelectList,
    UpdateValue,
    Materialized,
    UnionMember,
}

impl SubqueryKind {
    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "attached_subqueries" => SubqueryKind::Attached,
            "optimized_away_subqueries" => SubqueryKind::OptimizedAway,
            "order_by_subqueries" => SubqueryKind::OrderBy,
            "group_by_subqueries" => SubqueryKind::GroupBy,
            "having_subqueries" => SubqueryKind::Having,
            "select_list_subqueries" => SubqueryKind::SelectList,
            "update_value_subqueries" => SubqueryKind::UpdateValue,
            "materialized_from_subquery" => SubqueryKind::Materialized,
            "query_specifications" => SubqueryKind::UnionMember,
            _ => return None,
        })
    }
}

/// Temporary table / filesort flags of a sorting wrapper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SortFlags {
    pub using_temporary: bool,
    pub using_filesort: bool,
}

impl SortFlags {
    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            using_temporary: flag(obj, "using_temporary_table"),
            using_filesort: flag(obj, "using_filesort"),
        }
    }

    fn merge(self, other: SortFlags) -> Self {
        Self {
            using_temporary: self.using_temporary || other.using_temporary,
            using_filesort: self.using_filesort || other.using_filesort,
        }
    }
}

/// Decoded `table` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableAccess {
    pub table_name: String,
    pub partitions: Vec<String>,
    pub access_type: Option<String>,
    pub possible_keys: Vec<String>,
    pub key: Option<String>,
    pub key_length: Option<String>,
    pub r#ref: Vec<String>,
    pub rows: u64,
    pub filtered: f64,
    pub using_index: bool,
    pub index_condition: bool,
    pub attached_condition: bool,
    pub sort: SortFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanNode {
    QueryBlock {
        select_id: Option<u32>,
        cost: Option<f64>,
        children: Vec<PlanNode>,
    },
    TableAccess {
        access: TableAccess,
        children: Vec<PlanNode>,
    },
    NestedLoop(Vec<PlanNode>),
    Ordering {
        sort: SortFlags,
        children: Vec<PlanNode>,
    },
    Grouping {
        sort: SortFlags,
        children: Vec<PlanNode>,
    },
    DuplicatesRemoval {
        sort: SortFlags,
        children: Vec<PlanNode>,
    },
    UnionResult {
        table_name: String,
        using_temporary: bool,
        children: Vec<PlanNode>,
    },
    Subquery {
        kind: SubqueryKind,
        children: Vec<PlanNode>,
    },
    Message(String),
    /// Object or array under a key outside the vocabulary
    Other {
        key: String,
        children: Vec<PlanNode>,
    },
}

impl PlanNode {
    pub fn children(&self) -> &[PlanNode] {
        match self {
            PlanNode::QueryBlock { children, .. }
            | PlanNode::TableAccess { children, .. }
            | PlanNode::Ordering { children, .. }
            | PlanNode::Grouping { children, .. }
            | PlanNode::DuplicatesRemoval { children, .. }
            | PlanNode::UnionResult { children, .. }
            | PlanNode::Subquery { children, .. }
            | PlanNode::Other { children, .. } => children,
            PlanNode::NestedLoop(children) => children,
            PlanNode::Message(_) => &[],
        }
    }

    /// Depth-first walk calling `enter` before and `leave` after the children.
    pub fn walk<V: PlanVisitor>(&self, visitor: &mut V, depth: usize) {
        visitor.enter(self, depth);
        for child in self.children() {
            child.walk(visitor, depth + 1);
        }
        visitor.leave(self, depth);
    }
}

pub trait PlanVisitor {
    fn enter(&mut self, _node: &PlanNode, _depth: usize) {}
    fn leave(&mut self, _node: &PlanNode, _depth: usize) {}
}

/// Decoded JSON plan; top-level nodes in document order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonPlan {
    pub nodes: Vec<PlanNode>,
}

fn flag(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn strings(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Number or numeric string.
fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl TableAccess {
    fn from_object(obj: &Map<String, Value>) -> Self {
        let rows = number(obj, "rows_examined_per_scan")
            .or_else(|| number(obj, "rows"))
            .unwrap_or(0.0);
        Self {
            table_name: text(obj, "table_name").unwrap_or_default(),
            partitions: strings(obj, "partitions"),
            access_type: text(obj, "access_type"),
            possible_keys: strings(obj, "possible_keys"),
            key: text(obj, "key"),
            key_length: text(obj, "key_length"),
            r#ref: strings(obj, "ref"),
            rows: rows.max(0.0) as u64,
            filtered: clamp_filtered(number(obj, "filtered").unwrap_or(0.0)),
            using_index: flag(obj, "using_index"),
            index_condition: obj.contains_key("index_condition"),
            attached_condition: obj.contains_key("attached_condition"),
            sort: SortFlags::from_object(obj),
        }
    }

    /// Extra text in the order the server prints it.
    fn extra(&self, inherited: SortFlags) -> String {
        let sort = self.sort.merge(inherited);
        let mut items = Vec::new();
        if self.index_condition {
            items.push("Using index condition");
        }
        if self.attached_condition {
            items.push("Using where");
        }
        if self.using_index {
            items.push("Using index");
        }
        if sort.using_temporary {
            items.push("Using temporary");
        }
        if sort.using_filesort {
            items.push("Using filesort");
        }
        if items.is_empty() {
            "NULL".to_string()
        } else {
            items.join("; ")
        }
    }

    fn to_row(&self, select_id: Option<u32>, inherited: SortFlags) -> PlanRow {
        let access_type = null_if_empty(self.access_type.as_deref().unwrap_or_default());
        PlanRow {
            id: select_id,
            select_type: String::new(),
            table: self.table_name.clone(),
            partitions: if self.partitions.is_empty() {
                "NULL".to_string()
            } else {
                self.partitions.join(",")
            },
            scalability: complexity(&access_type).to_string(),
            access_type,
            possible_keys: self.possible_keys.clone(),
            key: null_if_empty(self.key.as_deref().unwrap_or_default()),
            key_len: null_if_empty(self.key_length.as_deref().unwrap_or_default()),
            r#ref: self.r#ref.clone(),
            rows: self.rows,
            filtered: self.filtered,
            extra: self.extra(inherited),
        }
    }
}

/// Children of one JSON object, one node per structural key, document order.
fn children_of(obj: &Map<String, Value>) -> Vec<PlanNode> {
    obj.iter().filter_map(|(key, value)| node_for(key, value)).collect()
}

/// Children of an object or of every object inside an array.
fn children_of_value(value: &Value) -> Vec<PlanNode> {
    match value {
        Value::Object(obj) => children_of(obj),
        Value::Array(items) => items.iter().flat_map(children_of_value).collect(),
        _ => Vec::new(),
    }
}

fn node_for(key: &str, value: &Value) -> Option<PlanNode> {
    if let Some(kind) = SubqueryKind::from_key(key) {
        return Some(PlanNode::Subquery {
            kind,
            children: children_of_value(value),
        });
    }
    match (key, value) {
        ("query_block", Value::Object(obj)) => Some(PlanNode::QueryBlock {
            select_id: number(obj, "select_id").map(|id| id as u32),
            cost: obj
                .get("cost_info")
                .and_then(Value::as_object)
                .and_then(|c| number(c, "query_cost")),
            children: children_of(obj),
        }),
        ("table", Value::Object(obj)) => Some(PlanNode::TableAccess {
            access: TableAccess::from_object(obj),
            children: children_of(obj),
        }),
        ("nested_loop", _) => Some(PlanNode::NestedLoop(children_of_value(value))),
        ("ordering_operation", Value::Object(obj)) => Some(PlanNode::Ordering {
            sort: SortFlags::from_object(obj),
            children: children_of(obj),
        }),
        ("grouping_operation", Value::Object(obj)) => Some(PlanNode::Grouping {
            sort: SortFlags::from_object(obj),
            children: children_of(obj),
        }),
        ("duplicates_removal", Value::Object(obj)) => Some(PlanNode::DuplicatesRemoval {
            sort: SortFlags::from_object(obj),
            children: children_of(obj),
        }),
        ("union_result", Value::Object(obj)) => Some(PlanNode::UnionResult {
            table_name: text(obj, "table_name").unwrap_or_default(),
            using_temporary: flag(obj, "using_temporary_table"),
            children: children_of(obj),
        }),
        ("message", Value::String(message)) => Some(PlanNode::Message(message.clone())),
        (_, Value::Object(_) | Value::Array(_)) => {
            let children = children_of_value(value);
            (!children.is_empty()).then(|| PlanNode::Other {
                key: key.to_string(),
                children,
            })
        }
        _ => None,
    }
}

/// Validates and decodes a JSON plan document.
pub fn parse_json(raw: &str) -> SbxResult<JsonPlan> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| SbxError::PlanParse(format!("invalid JSON EXPLAIN: {e}")))?;
    let Value::Object(root) = value else {
        return Err(SbxError::PlanParse("JSON EXPLAIN must be an object".to_string()));
    };
    Ok(JsonPlan {
        nodes: children_of(&root),
    })
}

/// Flattens table-access nodes into plan rows.
#[derive(Default)]
struct Flattener {
    select_ids: Vec<Option<u32>>,
    /// Sort flags waiting for the first table under a wrapper
    pending: Vec<SortFlags>,
    rows: Vec<PlanRow>,
    messages: Vec<String>,
}

impl PlanVisitor for Flattener {
    fn enter(&mut self, node: &PlanNode, depth: usize) {
        match node {
            PlanNode::QueryBlock { select_id, .. } => {
                trace!(depth, ?select_id, "query block");
                self.select_ids.push(*select_id);
            }
            PlanNode::Ordering { sort, .. }
            | PlanNode::Grouping { sort, .. }
            | PlanNode::DuplicatesRemoval { sort, .. } => self.pending.push(*sort),
            PlanNode::TableAccess { access, .. } => {
                trace!(depth, table = %access.table_name, "table access");
                if access.table_name.is_empty() {
                    return;
                }
                let inherited = self
                    .pending
                    .iter_mut()
                    .fold(SortFlags::default(), |acc, flags| acc.merge(std::mem::take(flags)));
                let select_id = self.select_ids.last().copied().flatten();
                self.rows.push(access.to_row(select_id, inherited));
            }
            PlanNode::Message(message) => self.messages.push(message.clone()),
            _ => {}
        }
    }

    fn leave(&mut self, node: &PlanNode, _depth: usize) {
        match node {
            PlanNode::QueryBlock { .. } => {
                self.select_ids.pop();
            }
            PlanNode::Ordering { .. } | PlanNode::Grouping { .. } | PlanNode::DuplicatesRemoval { .. } => {
                self.pending.pop();
            }
            _ => {}
        }
    }
}

impl JsonPlan {
    pub fn walk<V: PlanVisitor>(&self, visitor: &mut V) {
        for node in &self.nodes {
            node.walk(visitor, 0);
        }
    }

    /// One row per table-access node, depth-first order.
    pub fn rows(&self) -> Vec<PlanRow> {
        let mut flattener = Flattener::default();
        self.walk(&mut flattener);
        flattener.rows
    }

    /// Query-block messages such as `no matching row in const table`.
    pub fn messages(&self) -> Vec<String> {
        let mut flattener = Flattener::default();
        self.walk(&mut flattener);
        flattener.messages
    }

    /// `cost_info.query_cost` of the outermost query block.
    pub fn query_cost(&self) -> Option<f64> {
        self.nodes.iter().find_map(|node| match node {
            PlanNode::QueryBlock { cost, .. } => *cost,
            _ => None,
        })
    }
}
