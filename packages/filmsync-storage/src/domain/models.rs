//! Domain models shared by every adapter and by the pipeline
//!
//! - `Watermark`: resumable cursor value of a producer
//! - `QueryParam`: a positional bind value for a relational query
//! - `RawRow`: one joined relational row (ordered field → value)
//! - `BulkOperation` / `BulkResponse`: the document index write contract

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use crate::{Result, StorageError};

/// Identifier of a root entity or sub-entity (UUID text in practice)
pub type EntityId = String;

// ═══════════════════════════════════════════════════════════════════════════
// Watermark
// ═══════════════════════════════════════════════════════════════════════════

/// Last-seen value of a monotonic state column.
///
/// Serialised untagged so the cursor file stays human readable:
/// a JSON number, an RFC 3339 string or a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Watermark {
    Int(i64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl Watermark {
    /// Convert a row field into a watermark.
    ///
    /// Strings that parse as RFC 3339 (or the naive `YYYY-MM-DD HH:MM:SS[.f]`
    /// form PostgreSQL prints) become `Timestamp`; `null` yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Watermark::Int),
            Value::String(s) => Some(parse_timestamp(s).map_or_else(
                || Watermark::Text(s.clone()),
                Watermark::Timestamp,
            )),
            _ => None,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Watermark::Int(_) => 0,
            Watermark::Timestamp(_) => 1,
            Watermark::Text(_) => 2,
        }
    }
}

impl PartialOrd for Watermark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Watermark {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Watermark::Int(a), Watermark::Int(b)) => a.cmp(b),
            (Watermark::Timestamp(a), Watermark::Timestamp(b)) => a.cmp(b),
            (Watermark::Text(a), Watermark::Text(b)) => a.cmp(b),
            // A state column never changes type; rank keeps Ord total anyway
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Int(v) => write!(f, "{}", v),
            Watermark::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Watermark::Text(s) => write!(f, "{}", s),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ═══════════════════════════════════════════════════════════════════════════
// Query parameters
// ═══════════════════════════════════════════════════════════════════════════

/// Positional bind value (`$1`, `$2`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryParam {
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    TextArray(Vec<String>),
}

impl From<&Watermark> for QueryParam {
    fn from(watermark: &Watermark) -> Self {
        match watermark {
            Watermark::Int(v) => QueryParam::Int(*v),
            Watermark::Timestamp(ts) => QueryParam::Timestamp(*ts),
            Watermark::Text(s) => QueryParam::Text(s.clone()),
        }
    }
}

impl QueryParam {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            QueryParam::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text_array(&self) -> Option<&[String]> {
        match self {
            QueryParam::TextArray(v) => Some(v),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Raw rows
// ═══════════════════════════════════════════════════════════════════════════

/// One relational result row: ordered field → JSON value mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow {
    fields: Map<String, Value>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(field, value)` pairs, keeping their order
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self {
            fields: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// String field; `None` only for missing, `null` or non-text values.
    /// An empty string is a value and comes back as `Some("")`.
    pub fn opt_str(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Required string field, empty text allowed
    pub fn str_field(&self, field: &str) -> Result<&str> {
        self.opt_str(field).ok_or_else(|| {
            StorageError::serialization(format!("Row is missing text field '{}'", field))
        })
    }

    /// Identifier field; numeric ids are rendered as decimal text
    pub fn id_field(&self, field: &str) -> Result<EntityId> {
        match self.fields.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(StorageError::serialization(format!(
                "Row is missing id field '{}'",
                field
            ))),
        }
    }

    /// Optional float; numeric strings (NUMERIC cast to text) are accepted
    pub fn opt_f64(&self, field: &str) -> Option<f64> {
        match self.fields.get(field) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Bulk write contract
// ═══════════════════════════════════════════════════════════════════════════

/// Create-or-replace of one document, keyed by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub index: String,
    pub id: EntityId,
    pub document: Value,
}

impl BulkOperation {
    pub fn index(index: impl Into<String>, id: impl Into<EntityId>, document: Value) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            document,
        }
    }
}

/// A document the index refused inside an otherwise successful bulk call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemFailure {
    pub id: EntityId,
    pub status: u16,
    pub reason: String,
}

/// Outcome of one bulk call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub took_ms: u64,
    pub items: usize,
    pub failures: Vec<BulkItemFailure>,
}

impl BulkResponse {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.items.saturating_sub(self.failures.len())
    }
}
