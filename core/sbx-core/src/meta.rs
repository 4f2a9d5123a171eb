//! Column/Meta model: database → table → column.
//!
//! Filled from `SHOW FULL COLUMNS` against the shadow database and handed to
//! the advisory layer as plain data.

use serde::Serialize;
use std::collections::BTreeMap;

/// Server version from which temporal types store fractional seconds.
const FRACTIONAL_TEMPORAL_VERSION: u32 = 50604;

/// Maximum bytes per character for the character sets MySQL ships.
const CHARSET_BYTES: &[(&str, u64)] = &[
    ("armscii8", 1),
    ("ascii", 1),
    ("big5", 2),
    ("binary", 1),
    ("cp1250", 1),
    ("cp1251", 1),
    ("cp1256", 1),
    ("cp1257", 1),
    ("cp850", 1),
    ("cp852", 1),
    ("cp866", 1),
    ("cp932", 2),
    ("dec8", 1),
    ("eucjpms", 3),
    ("euckr", 2),
    ("gb18030", 4),
    ("gb2312", 2),
    ("gbk", 2),
    ("geostd8", 1),
    ("greek", 1),
    ("hebrew", 1),
    ("hp8", 1),
    ("keybcs2", 1),
    ("koi8r", 1),
    ("koi8u", 1),
    ("latin1", 1),
    ("latin2", 1),
    ("latin5", 1),
    ("latin7", 1),
    ("macce", 1),
    ("macroman", 1),
    ("sjis", 2),
    ("swe7", 1),
    ("tis620", 1),
    ("ucs2", 2),
    ("ujis", 3),
    ("utf16", 4),
    ("utf16le", 4),
    ("utf32", 4),
    ("utf8", 3),
    ("utf8mb3", 3),
    ("utf8mb4", 4),
];

/// 컬럼 정보
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub database: String,
    pub table: String,
    /// Full type as shown by the server, e.g. `varchar(64)`, `int unsigned`
    pub data_type: String,
    pub character_set: String,
    pub collation: String,
    pub nullable: bool,
    /// `PRI`, `UNI`, `MUL` or empty
    pub key: String,
    pub default: Option<String>,
    pub extra: String,
    pub comment: String,
    /// Distinct values / rows in `[0, 1]`, when measured
    pub cardinality: Option<f64>,
}

impl Column {
    /// `utf8mb4_0900_ai_ci` → `utf8mb4`. Empty for non-string columns.
    pub fn charset_of_collation(collation: &str) -> String {
        match collation {
            "" | "NULL" => String::new(),
            c => c.split('_').next().unwrap_or(c).to_string(),
        }
    }

    /// Type name without length or attributes: `decimal(10,2) unsigned` → `decimal`.
    pub fn type_base(&self) -> String {
        data_type_base(&self.data_type)
    }

    /// Declared length arguments: `decimal(10,2)` → `[10, 2]`.
    pub fn type_lengths(&self) -> Vec<u64> {
        data_type_lengths(&self.data_type)
    }

    /// Upper bound of bytes one value of this column can occupy.
    pub fn storage_bytes(&self, server_version: u32) -> u64 {
        let base = self.type_base();
        let lengths = self.type_lengths();
        let len = lengths.first().copied();

        if let Some(bytes) = numeric_bytes(&base, &lengths) {
            return bytes;
        }
        if let Some(bytes) = temporal_bytes(&base, len.unwrap_or(0), server_version) {
            return bytes;
        }

        let per_char = charset_bytes(&self.character_set);
        match base.as_str() {
            "char" => len.unwrap_or(1) * per_char,
            "binary" => len.unwrap_or(1),
            "varchar" => {
                let max = len.unwrap_or(0) * per_char;
                max + if max > 255 { 2 } else { 1 }
            }
            "varbinary" => {
                let max = len.unwrap_or(0);
                max + if max > 255 { 2 } else { 1 }
            }
            "tinyblob" | "tinytext" => (1 << 8) - 1 + 1,
            "blob" | "text" => (1 << 16) - 1 + 2,
            "mediumblob" | "mediumtext" => (1 << 24) - 1 + 3,
            "longblob" | "longtext" | "json" => (1u64 << 32) - 1 + 4,
            "enum" => {
                if enum_members(&self.data_type) > 255 {
                    2
                } else {
                    1
                }
            }
            "set" => (enum_members(&self.data_type) + 7) / 8,
            _ => 0,
        }
    }
}

/// Bytes per character of a character set; unknown sets count as 4.
pub fn charset_bytes(charset: &str) -> u64 {
    let lower = charset.to_ascii_lowercase();
    CHARSET_BYTES
        .iter()
        .find(|(name, _)| *name == lower)
        .map_or(4, |(_, bytes)| *bytes)
}

pub fn data_type_base(data_type: &str) -> String {
    data_type
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub fn data_type_lengths(data_type: &str) -> Vec<u64> {
    let Some(open) = data_type.find('(') else {
        return Vec::new();
    };
    let Some(close) = data_type[open..].find(')') else {
        return Vec::new();
    };
    data_type[open + 1..open + close]
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

fn enum_members(data_type: &str) -> u64 {
    let Some(open) = data_type.find('(') else {
        return 0;
    };
    let inner = data_type[open + 1..].trim_end_matches(')');
    inner.split("','").count() as u64
}

fn numeric_bytes(base: &str, lengths: &[u64]) -> Option<u64> {
    let bytes = match base {
        "tinyint" | "bool" | "boolean" => 1,
        "smallint" => 2,
        "mediumint" => 3,
        "int" | "integer" => 4,
        "bigint" => 8,
        "float" => match lengths.first() {
            Some(p) if *p > 24 => 8,
            _ => 4,
        },
        "double" | "real" => 8,
        "decimal" | "numeric" => {
            let precision = lengths.first().copied().unwrap_or(10);
            let scale = lengths.get(1).copied().unwrap_or(0);
            decimal_bytes(precision.saturating_sub(scale)) + decimal_bytes(scale)
        }
        "bit" => (lengths.first().copied().unwrap_or(1) + 7) / 8,
        _ => return None,
    };
    Some(bytes)
}

/// Packed decimal: 4 bytes per 9 digits plus the leftover table.
fn decimal_bytes(digits: u64) -> u64 {
    const LEFTOVER: [u64; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];
    (digits / 9) * 4 + LEFTOVER[(digits % 9) as usize]
}

fn temporal_bytes(base: &str, fsp: u64, version: u32) -> Option<u64> {
    if version >= FRACTIONAL_TEMPORAL_VERSION {
        let fraction = fsp.div_ceil(2);
        match base {
            "year" => Some(1),
            "date" => Some(3),
            "time" => Some(3 + fraction),
            "datetime" => Some(5 + fraction),
            "timestamp" => Some(4 + fraction),
            _ => None,
        }
    } else {
        match base {
            "year" => Some(1),
            "date" | "time" => Some(3),
            "datetime" => Some(8),
            "timestamp" => Some(4),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableMeta {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Estimated maximum row width in bytes.
    pub fn row_bytes(&self, server_version: u32) -> u64 {
        self.columns.iter().map(|c| c.storage_bytes(server_version)).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseMeta {
    pub name: String,
    pub tables: BTreeMap<String, TableMeta>,
}

/// Referenced schema objects keyed by logical database name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Meta {
    pub databases: BTreeMap<String, DatabaseMeta>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table entry, created on first use.
    pub fn table_mut(&mut self, database: &str, table: &str) -> &mut TableMeta {
        let db = self
            .databases
            .entry(database.to_string())
            .or_insert_with(|| DatabaseMeta {
                name: database.to_string(),
                tables: BTreeMap::new(),
            });
        db.tables.entry(table.to_string()).or_insert_with(|| TableMeta {
            name: table.to_string(),
            columns: Vec::new(),
        })
    }

    pub fn table(&self, database: &str, table: &str) -> Option<&TableMeta> {
        self.databases.get(database)?.tables.get(table)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.databases
            .values()
            .flat_map(|db| db.tables.values())
            .flat_map(|t| t.columns.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}
