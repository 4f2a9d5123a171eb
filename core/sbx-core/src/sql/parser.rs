use crate::error::{SbxError, SbxResult};
use serde::Serialize;
use sqlparser::ast::{
    Expr, ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor, Visit, Visitor,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;

/// 문장 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Use,
    Show,
    Explain,
    Other,
}

impl StatementKind {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "select" | "with" | "values" | "table" | "(" => StatementKind::Select,
            "insert" | "replace" => StatementKind::Insert,
            "update" => StatementKind::Update,
            "delete" => StatementKind::Delete,
            "create" | "alter" | "drop" | "truncate" | "rename" => StatementKind::Ddl,
            "use" => StatementKind::Use,
            "show" => StatementKind::Show,
            "explain" | "describe" | "desc" => StatementKind::Explain,
            _ => StatementKind::Other,
        }
    }

    pub fn is_dml(self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
        )
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

/// A table reference, optionally database-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    pub database: Option<String>,
    pub table: String,
    pub aliases: Vec<String>,
}

impl TableRef {
    pub fn new(database: Option<&str>, table: &str) -> Self {
        Self {
            database: database.map(str::to_string),
            table: table.to_string(),
            aliases: Vec::new(),
        }
    }

    fn from_object_name(name: &ObjectName) -> Option<Self> {
        let parts = &name.0;
        let table = parts.last()?;
        let database = parts.len().checked_sub(2).map(|i| parts[i].value.as_str());
        Some(Self::new(database, &table.value))
    }

    fn same_object(&self, other: &TableRef) -> bool {
        self.database == other.database && self.table == other.table
    }

    /// Whether `qualifier` (a table name or alias) designates this table.
    pub fn answers_to(&self, qualifier: &str) -> bool {
        self.table.eq_ignore_ascii_case(qualifier)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(qualifier))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(db) => write!(f, "{}.{}", db, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    /// Table name or alias the column was written with
    pub qualifier: Option<String>,
    pub column: String,
}

/// Statement handle consumed by the sandbox builder.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub sql: String,
    pub kind: StatementKind,
    /// Relations read or written, CTE names excluded, DDL objects excluded
    pub tables: Vec<TableRef>,
    /// Objects a DDL statement defines or changes
    pub ddl_targets: Vec<TableRef>,
    /// New names introduced by `RENAME TABLE a TO b`
    pub ddl_destinations: Vec<TableRef>,
    pub columns: Vec<ColumnRef>,
    /// `SELECT *` somewhere in the statement
    pub wildcard: bool,
    pub use_database: Option<String>,
    /// AST when sqlparser understood the statement
    pub statement: Option<Statement>,
}

impl ParsedStatement {
    fn new(sql: &str, kind: StatementKind) -> Self {
        Self {
            sql: sql.to_string(),
            kind,
            tables: Vec::new(),
            ddl_targets: Vec::new(),
            ddl_destinations: Vec::new(),
            columns: Vec::new(),
            wildcard: false,
            use_database: None,
            statement: None,
        }
    }

    /// First DDL object named through a database qualifier.
    pub fn qualified_ddl_object(&self) -> Option<&TableRef> {
        self.ddl_targets
            .iter()
            .chain(&self.ddl_destinations)
            .find(|t| t.database.is_some())
    }

    /// Column names that may belong to `table`.
    pub fn columns_of<'a>(&'a self, table: &'a TableRef) -> impl Iterator<Item = &'a str> + 'a {
        self.columns
            .iter()
            .filter(move |c| c.qualifier.as_deref().is_none_or(|q| table.answers_to(q)))
            .map(|c| c.column.as_str())
    }
}

/// SQL 파서: sqlparser-rs (MySQL dialect)
pub struct SqlParser {
    dialect: MySqlDialect,
}

impl SqlParser {
    /// 새 SQL 파서 생성
    pub fn new() -> Self {
        Self {
            dialect: MySqlDialect {},
        }
    }

    /// SQL 문자열을 AST로 파싱
    pub fn parse(&self, sql: &str) -> SbxResult<Vec<Statement>> {
        Parser::parse_sql(&self.dialect, sql).map_err(|e| SbxError::SqlParse {
            message: e.to_string(),
            sql: sql.to_string(),
        })
    }

    /// Tokens of the first statement, whitespace and comments removed.
    fn significant_tokens(&self, sql: &str) -> SbxResult<Vec<Token>> {
        let tokens = Tokenizer::new(&self.dialect, sql)
            .tokenize()
            .map_err(|e| SbxError::SqlParse {
                message: e.to_string(),
                sql: sql.to_string(),
            })?;
        Ok(tokens
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .skip_while(|t| matches!(t, Token::SemiColon))
            .take_while(|t| !matches!(t, Token::SemiColon))
            .collect())
    }

    /// Kind, referenced tables and columns of one statement.
    ///
    /// DML must parse; DDL and `USE` fall back to a token scan so that
    /// dialect corners sqlparser rejects still reach the sandbox.
    pub fn analyze(&self, sql: &str) -> SbxResult<ParsedStatement> {
        let tokens = self.significant_tokens(sql)?;
        let keyword = match tokens.first() {
            Some(Token::Word(w)) => w.value.to_ascii_lowercase(),
            Some(Token::LParen) => "(".to_string(),
            _ => {
                return Err(SbxError::SqlParse {
                    message: "empty statement".to_string(),
                    sql: sql.to_string(),
                });
            }
        };
        let mut parsed = ParsedStatement::new(sql, StatementKind::from_keyword(&keyword));

        match parsed.kind {
            StatementKind::Use => {
                let db = tokens.get(1).and_then(word).ok_or_else(|| SbxError::SqlParse {
                    message: "USE without database".to_string(),
                    sql: sql.to_string(),
                })?;
                parsed.use_database = Some(db.to_string());
            }
            StatementKind::Ddl => {
                let (targets, destinations) = ddl_objects(&tokens);
                parsed.ddl_targets = targets;
                parsed.ddl_destinations = destinations;
                parsed.statement = self.parse(sql).ok().and_then(|s| s.into_iter().next());
            }
            kind if kind.is_dml() => {
                parsed.statement = self.parse(sql)?.into_iter().next();
            }
            _ => {
                parsed.statement = self.parse(sql).ok().and_then(|s| s.into_iter().next());
            }
        }

        if let Some(statement) = &parsed.statement {
            let mut collector = ReferenceCollector::default();
            let _ = statement.visit(&mut collector);
            collector.finish(&mut parsed);
        }
        Ok(parsed)
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

fn word(token: &Token) -> Option<&str> {
    match token {
        Token::Word(w) => Some(w.value.as_str()),
        _ => None,
    }
}

fn is_kw(token: Option<&Token>, kw: &str) -> bool {
    token
        .and_then(word)
        .is_some_and(|w| w.eq_ignore_ascii_case(kw))
}

/// `name` or `db.name` starting at `i`; returns the ref and the next index.
fn object_at(tokens: &[Token], i: usize) -> Option<(TableRef, usize)> {
    let first = tokens.get(i).and_then(word)?;
    if matches!(tokens.get(i + 1), Some(Token::Period)) {
        let second = tokens.get(i + 2).and_then(word)?;
        Some((TableRef::new(Some(first), second), i + 3))
    } else {
        Some((TableRef::new(None, first), i + 1))
    }
}

fn position_of(tokens: &[Token], from: usize, kw: &str) -> Option<usize> {
    (from..tokens.len()).find(|&i| is_kw(tokens.get(i), kw))
}

fn skip_if_exists(tokens: &[Token], mut i: usize) -> usize {
    if is_kw(tokens.get(i), "if") {
        i += 1;
        if is_kw(tokens.get(i), "not") {
            i += 1;
        }
        if is_kw(tokens.get(i), "exists") {
            i += 1;
        }
    }
    i
}

/// Comma separated object list starting at `i`.
fn object_list(tokens: &[Token], mut i: usize) -> Vec<TableRef> {
    let mut out = Vec::new();
    while let Some((obj, next)) = object_at(tokens, i) {
        out.push(obj);
        if matches!(tokens.get(next), Some(Token::Comma)) {
            i = next + 1;
        } else {
            break;
        }
    }
    out
}

/// DDL objects by token scan: (targets, rename destinations).
fn ddl_objects(tokens: &[Token]) -> (Vec<TableRef>, Vec<TableRef>) {
    let lead = tokens.first().and_then(word).unwrap_or_default().to_ascii_lowercase();
    let object_kw = (1..tokens.len()).find_map(|i| {
        let w = word(&tokens[i])?.to_ascii_lowercase();
        matches!(w.as_str(), "table" | "index" | "view" | "database" | "schema").then_some((i, w))
    });

    match (lead.as_str(), object_kw) {
        ("truncate", None) => (object_list(tokens, 1), Vec::new()),
        ("truncate", Some((i, _))) => (object_list(tokens, i + 1), Vec::new()),
        ("rename", Some((i, w))) if w == "table" => {
            let mut targets = Vec::new();
            let mut destinations = Vec::new();
            let mut i = i + 1;
            while let Some((from, next)) = object_at(tokens, i) {
                targets.push(from);
                if !is_kw(tokens.get(next), "to") {
                    break;
                }
                let Some((to, next)) = object_at(tokens, next + 1) else {
                    break;
                };
                destinations.push(to);
                if !matches!(tokens.get(next), Some(Token::Comma)) {
                    break;
                }
                i = next + 1;
            }
            (targets, destinations)
        }
        (_, Some((i, w))) if w == "index" => {
            let target = position_of(tokens, i + 1, "on")
                .and_then(|on| object_at(tokens, on + 1))
                .map(|(obj, _)| obj);
            (target.into_iter().collect(), Vec::new())
        }
        ("create" | "alter", Some((i, w))) if w == "table" || w == "view" => {
            let i = skip_if_exists(tokens, i + 1);
            (object_at(tokens, i).map(|(o, _)| o).into_iter().collect(), Vec::new())
        }
        ("drop", Some((i, w))) if w == "table" || w == "view" => {
            let i = skip_if_exists(tokens, i + 1);
            (object_list(tokens, i), Vec::new())
        }
        _ => (Vec::new(), Vec::new()),
    }
}

#[derive(Default)]
struct ReferenceCollector {
    ctes: HashSet<String>,
    tables: Vec<TableRef>,
    aliases: Vec<(String, TableRef)>,
    columns: Vec<ColumnRef>,
    wildcard: bool,
}

impl ReferenceCollector {
    fn add_column(&mut self, qualifier: Option<&str>, column: &str) {
        let col = ColumnRef {
            qualifier: qualifier.map(str::to_string),
            column: column.to_string(),
        };
        if !self.columns.contains(&col) {
            self.columns.push(col);
        }
    }

    fn finish(self, parsed: &mut ParsedStatement) {
        let excluded: Vec<&TableRef> = parsed
            .ddl_targets
            .iter()
            .chain(&parsed.ddl_destinations)
            .collect();

        for table in self.tables {
            let is_cte = table.database.is_none() && self.ctes.contains(&table.table.to_lowercase());
            let is_ddl_object = excluded.iter().any(|t| t.same_object(&table));
            let seen = parsed.tables.iter().any(|t| t.same_object(&table));
            if !is_cte && !is_ddl_object && !seen {
                parsed.tables.push(table);
            }
        }
        for (alias, target) in self.aliases {
            if let Some(table) = parsed.tables.iter_mut().find(|t| t.same_object(&target)) {
                if !table.aliases.contains(&alias) {
                    table.aliases.push(alias);
                }
            }
        }
        parsed.columns = self.columns;
        parsed.wildcard = self.wildcard;
    }
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        if let SetExpr::Select(select) = query.body.as_ref() {
            if select
                .projection
                .iter()
                .any(|item| matches!(item, SelectItem::Wildcard(..) | SelectItem::QualifiedWildcard(..)))
            {
                self.wildcard = true;
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if let Some(table) = TableRef::from_object_name(relation) {
            self.tables.push(table);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Table {
            name,
            alias: Some(alias),
            ..
        } = factor
        {
            if let Some(table) = TableRef::from_object_name(name) {
                self.aliases.push((alias.name.value.clone(), table));
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.add_column(None, &ident.value),
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let column = &parts[parts.len() - 1].value;
                let qualifier = &parts[parts.len() - 2].value;
                self.add_column(Some(qualifier), column);
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}
