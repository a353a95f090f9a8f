//! Lookup table data model
//!
//! A [`LookupTable`] maps [`GeographyCode`]s to a fixed set of scalar columns
//! and carries provenance describing where (and how completely) it was fetched.

use crate::error::SourceFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Scalars
// =============================================================================

/// Case-normalized geography identifier (e.g. `E09000001`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeographyCode(String);

impl GeographyCode {
    /// Trim and upper-case; `None` for blank input
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GeographyCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value).ok_or_else(|| "empty geography code".to_string())
    }
}

impl From<GeographyCode> for String {
    fn from(code: GeographyCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for GeographyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single cell: string, number or null
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Number(serde_json::Number),
    Text(String),
}

impl CellValue {
    /// Convert a decoded JSON value; booleans become text, nested values are
    /// not scalars and yield `None`
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Text(b.to_string())),
            serde_json::Value::Number(n) => Some(Self::Number(n.clone())),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Interpret a CSV field: empty is null, numeric text becomes a number
    pub fn from_csv_field(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Number(i.into());
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Self::Number(n);
            }
        }
        Self::Text(field.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text form used when a cell is promoted to a geography code
    pub fn as_code_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

// =============================================================================
// Records and tables
// =============================================================================

/// One row of a lookup table; identity is the code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRecord {
    pub code: GeographyCode,
    #[serde(default)]
    pub values: BTreeMap<String, CellValue>,
}

impl LookupRecord {
    pub fn new(code: GeographyCode) -> Self {
        Self {
            code,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Value for a column, `Null` when the record does not define it
    pub fn get(&self, column: &str) -> &CellValue {
        static NULL: CellValue = CellValue::Null;
        self.values.get(column).unwrap_or(&NULL)
    }

    /// Whether the column holds a non-null value
    pub fn is_populated(&self, column: &str) -> bool {
        !self.get(column).is_null()
    }
}

/// Where a table came from and how complete it is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub page_count: usize,
    pub partial: bool,
    #[serde(default)]
    pub failures: Vec<SourceFailure>,
}

impl Provenance {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            fetched_at: Utc::now(),
            page_count: 0,
            partial: false,
            failures: Vec::new(),
        }
    }

    /// Record a failure; any failure makes the table partial
    pub fn record_failure(&mut self, failure: SourceFailure) {
        self.partial = true;
        self.failures.push(failure);
    }
}

/// Ordered code → attributes table with a shared column schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupTable {
    /// Name of the key column the codes were read from
    pub code_column: String,
    /// Non-key columns, in declaration order
    pub schema: Vec<String>,
    pub records: Vec<LookupRecord>,
    pub provenance: Provenance,
}

impl LookupTable {
    pub fn new(code_column: impl Into<String>, schema: Vec<String>, source: &str) -> Self {
        Self {
            code_column: code_column.into(),
            schema,
            records: Vec::new(),
            provenance: Provenance::new(source),
        }
    }

    pub fn source(&self) -> &str {
        &self.provenance.source
    }

    pub fn is_partial(&self) -> bool {
        self.provenance.partial
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, code: &GeographyCode) -> Option<&LookupRecord> {
        self.records.iter().find(|r| &r.code == code)
    }

    /// Codes in table order
    pub fn codes(&self) -> impl Iterator<Item = &GeographyCode> {
        self.records.iter().map(|r| &r.code)
    }

    /// Add columns not yet in the schema, keeping first-seen order
    pub fn extend_schema<'a>(&mut self, columns: impl IntoIterator<Item = &'a String>) {
        for column in columns {
            if column != &self.code_column && !self.schema.contains(column) {
                self.schema.push(column.clone());
            }
        }
    }

    /// Append records, last write wins per code; a replaced record keeps the
    /// position of the code's first appearance. Returns how many were replaced.
    pub fn upsert_records(&mut self, incoming: impl IntoIterator<Item = LookupRecord>) -> usize {
        let mut index: HashMap<GeographyCode, usize> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.code.clone(), i))
            .collect();
        let mut replaced = 0;

        for record in incoming {
            match index.get(&record.code) {
                Some(&pos) => {
                    self.records[pos] = record;
                    replaced += 1;
                }
                None => {
                    index.insert(record.code.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }
        replaced
    }

    /// Give every record an explicit value for every schema column
    pub fn fill_missing_columns(&mut self) {
        for record in &mut self.records {
            for column in &self.schema {
                record
                    .values
                    .entry(column.clone())
                    .or_insert(CellValue::Null);
            }
        }
    }

    /// True when no code appears twice
    pub fn has_unique_codes(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.records.iter().all(|r| seen.insert(&r.code))
    }
}

// =============================================================================
// Merge results
// =============================================================================

/// A value discarded because a higher-precedence source already populated it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueConflict {
    pub code: GeographyCode,
    pub column: String,
    pub kept_source: String,
    pub kept: CellValue,
    pub discarded_source: String,
    pub discarded: CellValue,
}

/// Exact counts of what a merge did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Codes new to the local table
    pub added: usize,
    /// Codes present locally whose values the remote changed
    pub overwritten: usize,
    /// Codes present locally that the remote re-supplied unchanged
    pub unchanged: usize,
    /// Local codes without a remote counterpart, kept (union mode)
    pub preserved: usize,
    /// Local codes without a remote counterpart, removed (replace mode)
    pub dropped: usize,
    /// Values discarded by cross-source precedence
    #[serde(default)]
    pub conflicts: Vec<ValueConflict>,
}

/// Outcome of merging a fresh table against the persisted copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub table: LookupTable,
    pub summary: ChangeSummary,
    /// Every source/page failure that occurred during acquisition
    pub failures: Vec<SourceFailure>,
}

impl MergeResult {
    pub fn is_partial(&self) -> bool {
        self.table.is_partial()
    }
}
