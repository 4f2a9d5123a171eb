//! Shadow Mapping: logical ↔ shadow database names of one builder.

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};

const SUFFIX_LEN: usize = 16;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TIMESTAMP_FORMAT: &str = "%y%m%d%H%M%S";

/// `<prefix>_<YYMMDDHHmmss>_<16 lowercase alphanumerics>`
pub fn shadow_name(prefix: &str, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}_{}_{suffix}", now.format(TIMESTAMP_FORMAT))
}

/// Creation time encoded in a shadow name; `None` unless the name has the
/// exact shape [`shadow_name`] produces for `prefix`.
pub fn parse_shadow_timestamp(prefix: &str, name: &str) -> Option<DateTime<Utc>> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('_')?;
    let (timestamp, suffix) = rest.split_once('_')?;
    let valid_suffix = suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b));
    if timestamp.len() != 12 || !valid_suffix {
        return None;
    }
    NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// Name mappings owned by exactly one [`SandboxBuilder`](super::SandboxBuilder).
#[derive(Debug, Clone, Default)]
pub struct ShadowMapping {
    logical_to_shadow: HashMap<String, String>,
    shadow_to_logical: HashMap<String, String>,
    /// shadow database → tables whose DDL is mirrored
    created: HashMap<String, HashSet<String>>,
}

impl ShadowMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shadow_of(&self, logical: &str) -> Option<&str> {
        self.logical_to_shadow.get(logical).map(String::as_str)
    }

    pub fn logical_of(&self, shadow: &str) -> Option<&str> {
        self.shadow_to_logical.get(shadow).map(String::as_str)
    }

    /// Records a new pair; an existing mapping for `logical` is kept.
    pub fn insert(&mut self, logical: &str, shadow: &str) -> bool {
        if self.logical_to_shadow.contains_key(logical) {
            return false;
        }
        self.logical_to_shadow.insert(logical.to_string(), shadow.to_string());
        self.shadow_to_logical.insert(shadow.to_string(), logical.to_string());
        true
    }

    pub fn is_created(&self, shadow: &str, table: &str) -> bool {
        self.created
            .get(shadow)
            .is_some_and(|tables| tables.contains(table))
    }

    /// Marks a table as mirrored; `false` if it already was.
    pub fn mark_created(&mut self, shadow: &str, table: &str) -> bool {
        self.created
            .entry(shadow.to_string())
            .or_default()
            .insert(table.to_string())
    }

    /// `(logical, shadow)` pairs, sorted by logical name.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .logical_to_shadow
            .iter()
            .map(|(l, s)| (l.as_str(), s.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn shadows(&self) -> Vec<String> {
        self.pairs().into_iter().map(|(_, s)| s.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.logical_to_shadow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logical_to_shadow.is_empty()
    }

    pub fn clear(&mut self) {
        self.logical_to_shadow.clear();
        self.shadow_to_logical.clear();
        self.created.clear();
    }
}
