//! Domain models shared by every stage of the engine.
//!
//! - [`Row`] / [`Dataset`] - ordered records as they flow through a run
//! - [`TransformOutcome`] - everything a single run produces
//! - [`ConsoleLine`] - output captured from user code
//! - [`RowError`] / [`RunStats`] - per-row bookkeeping
//! - [`ColumnInfo`] - column set and discovered types for display

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Rows and datasets
// =============================================================================

/// One record. Field order is significant and preserved
/// (`serde_json` is built with `preserve_order`).
pub type Row = Map<String, Value>;

/// An ordered sequence of rows.
pub type Dataset = Vec<Row>;

/// Kind of a single cell value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Integer,
    Real,
    String,
    Boolean,
    Null,
    /// Several non-null kinds were seen in the same column.
    Mixed,
}

impl ValueKind {
    /// Kind of a scalar value. Arrays and objects have no kind.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Integer),
            Value::Number(_) => Some(Self::Real),
            Value::String(_) => Some(Self::String),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Whether a value is one of the cell kinds a row may hold.
pub fn is_scalar(value: &Value) -> bool {
    ValueKind::of(value).is_some()
}

// =============================================================================
// Run outcome
// =============================================================================

/// Severity of a captured console line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
}

/// A line written by user code through the console proxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsoleLine {
    pub level: ConsoleLevel,
    pub text: String,
}

impl ConsoleLine {
    pub fn new(level: ConsoleLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// A row whose routine call failed or produced nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row_index: usize,
    pub message: String,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Everything produced by one execution. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutcome {
    pub data: Dataset,
    pub console_lines: Vec<ConsoleLine>,
    pub stats: RunStats,
    pub row_errors: Vec<RowError>,
}

// =============================================================================
// Display helpers
// =============================================================================

/// A column as the grid sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ValueKind,
}

/// Union of field names across all rows, sorted.
pub fn column_names(dataset: &[Row]) -> Vec<String> {
    let names: BTreeSet<&String> = dataset.iter().flat_map(|row| row.keys()).collect();
    names.into_iter().cloned().collect()
}

/// Derive the column set with a simple kind per column.
///
/// Null cells do not influence the kind; a column with only nulls is `Null`.
pub fn discover_columns(dataset: &[Row]) -> Vec<ColumnInfo> {
    let mut kinds: BTreeMap<&str, ValueKind> = BTreeMap::new();

    for row in dataset {
        for (name, value) in row {
            let seen = ValueKind::of(value).unwrap_or(ValueKind::Mixed);
            kinds
                .entry(name.as_str())
                .and_modify(|current| *current = merge_kind(*current, seen))
                .or_insert(seen);
        }
    }

    kinds
        .into_iter()
        .map(|(name, kind)| ColumnInfo {
            name: name.to_string(),
            kind,
        })
        .collect()
}

fn merge_kind(current: ValueKind, seen: ValueKind) -> ValueKind {
    use ValueKind::*;
    match (current, seen) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Integer, Real) | (Real, Integer) => Real,
        _ => Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_column_names_sorted_union() {
        let data = vec![row(json!({"b": 1, "a": 2})), row(json!({"c": 3}))];
        assert_eq!(column_names(&data), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_discover_kinds() {
        let data = vec![
            row(json!({"n": 1, "s": "x", "m": 1, "z": null})),
            row(json!({"n": 2.5, "s": null, "m": "two", "z": null})),
        ];
        let cols = discover_columns(&data);
        let kind = |name: &str| cols.iter().find(|c| c.name == name).unwrap().kind;

        assert_eq!(kind("n"), ValueKind::Real);
        assert_eq!(kind("s"), ValueKind::String);
        assert_eq!(kind("m"), ValueKind::Mixed);
        assert_eq!(kind("z"), ValueKind::Null);
    }

    #[test]
    fn test_row_preserves_insertion_order() {
        let data = row(json!({"z": 1, "a": 2, "m": 3}));
        let keys: Vec<_> = data.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = TransformOutcome {
            data: vec![],
            console_lines: vec![ConsoleLine::new(ConsoleLevel::Warn, "careful")],
            stats: RunStats::default(),
            row_errors: vec![RowError {
                row_index: 3,
                message: "boom".into(),
            }],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["consoleLines"][0]["level"], "warn");
        assert_eq!(json["rowErrors"][0]["rowIndex"], 3);
    }
}
