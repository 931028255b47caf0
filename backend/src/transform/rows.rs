//! Row Transformer - runs a compiled routine over every row and merges results.
//!
//! For each row the routine gets its own copy. Produced fields replace the
//! mapping's source fields and are spliced in where the first declared source
//! sat, so the remaining columns keep their relative order:
//!
//! ```text
//! {A: 1, B: 2, C: 3}  --(B → X)-->  {A: 1, X: .., C: 3}
//! ```
//!
//! A produced field the row already had is updated where it stands.
//!
//! A failing row is kept as-is and listed; the batch carries on until the
//! failure count exceeds the configured limit.

use tracing::debug;

use super::report::Reporter;
use crate::catalog::MappingDefinition;
use crate::error::{EngineError, EngineResult};
use crate::models::{is_scalar, Dataset, Row, TransformOutcome};
use crate::sandbox::{ConsoleSink, RoutineOutput, TransformRoutine};

/// Default number of failed rows tolerated before a run stops early.
pub const DEFAULT_MAX_ROW_FAILURES: usize = 10;

const NO_VALUE: &str = "transform returned no value";

/// Applies routines to datasets.
#[derive(Debug, Clone, Copy)]
pub struct RowTransformer {
    max_failures: usize,
}

impl RowTransformer {
    /// Stop once more than `max_failures` rows have failed.
    pub fn new(max_failures: usize) -> Self {
        Self { max_failures }
    }

    pub fn max_failures(&self) -> usize {
        self.max_failures
    }

    /// Run `routine` over `dataset`.
    ///
    /// The returned dataset always has the input's length and order; it fails
    /// with [`EngineError::InvalidResult`] otherwise, or when it is empty.
    pub fn apply(
        &self,
        routine: &dyn TransformRoutine,
        dataset: &[Row],
        mapping: &MappingDefinition,
        console: &ConsoleSink,
    ) -> EngineResult<TransformOutcome> {
        let mut reporter = Reporter::new(dataset.len());
        let mut data: Dataset = Vec::with_capacity(dataset.len());

        for (index, row) in dataset.iter().enumerate() {
            let merged = routine
                .call(row.clone())
                .and_then(|output| merge_output(row, mapping, output));

            match merged {
                Ok(new_row) => {
                    data.push(new_row);
                    reporter.record_success();
                }
                Err(message) => {
                    debug!(row = index, %message, "row failed");
                    data.push(row.clone());
                    reporter.record_failure(index, message);

                    if reporter.failed() > self.max_failures {
                        let remaining = &dataset[index + 1..];
                        data.extend(remaining.iter().cloned());
                        reporter.note_early_stop(index, remaining.len());
                        break;
                    }
                }
            }
        }

        validate_result(dataset.len(), &data)?;
        Ok(reporter.finish(data, console.take()))
    }
}

impl Default for RowTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROW_FAILURES)
    }
}

/// Check the produced dataset before it may be committed.
pub fn validate_result(expected_rows: usize, data: &[Row]) -> EngineResult<()> {
    if data.is_empty() {
        return Err(EngineError::InvalidResult(
            "the produced dataset is empty".to_string(),
        ));
    }
    if data.len() != expected_rows {
        return Err(EngineError::InvalidResult(format!(
            "expected {} rows but produced {}",
            expected_rows,
            data.len()
        )));
    }
    Ok(())
}

// =============================================================================
// Merging
// =============================================================================

/// Turn one routine output into the replacement row.
pub fn merge_output(
    row: &Row,
    mapping: &MappingDefinition,
    output: RoutineOutput,
) -> Result<Row, String> {
    let targets = mapping.target_fields();
    let sources = mapping.source_fields();

    let produced = match output {
        RoutineOutput::Nothing => return Err(NO_VALUE.to_string()),
        RoutineOutput::Fields(fields) if fields.is_empty() => return Err(NO_VALUE.to_string()),
        RoutineOutput::Fields(fields) => fields,
        RoutineOutput::Scalar(value) => {
            if targets.len() != 1 {
                return Err(format!(
                    "transform returned a single value but this mapping produces {} fields ({}); return an object",
                    targets.len(),
                    targets.join(", ")
                ));
            }
            let mut fields = Row::new();
            fields.insert(targets[0].to_string(), value);
            fields
        }
    };

    for (name, value) in &produced {
        if sources.contains(&name.as_str()) {
            return Err(format!(
                "transform returned source field '{}'; source fields are replaced, not kept",
                name
            ));
        }
        if !is_scalar(value) {
            return Err(format!(
                "field '{}' must be a number, string, boolean or null",
                name
            ));
        }
    }

    let produced = order_produced(produced, &targets);
    Ok(splice(row, &sources, produced))
}

/// Declared targets first in declaration order, then extra keys by name.
fn order_produced(mut produced: Row, targets: &[&str]) -> Row {
    let mut ordered = Row::with_capacity(produced.len());
    for target in targets {
        if let Some(value) = produced.remove(*target) {
            ordered.insert(target.to_string(), value);
        }
    }
    let mut extras: Vec<(String, serde_json::Value)> = produced.into_iter().collect();
    extras.sort_by(|a, b| a.0.cmp(&b.0));
    ordered.extend(extras);
    ordered
}

/// Drop the sources, update fields the row already has in place, and insert
/// the new ones at the first declared source still present, or at the end
/// when none is.
fn splice(row: &Row, sources: &[&str], produced: Row) -> Row {
    let anchor = sources.iter().copied().find(|name| row.contains_key(*name));
    let (mut updates, fresh): (Row, Row) = produced
        .into_iter()
        .partition(|(name, _)| row.contains_key(name));
    let mut merged = Row::with_capacity(row.len() + fresh.len());
    let mut pending = Some(fresh);

    for (name, value) in row {
        if Some(name.as_str()) == anchor {
            if let Some(fields) = pending.take() {
                merged.extend(fields);
            }
            continue;
        }
        if sources.contains(&name.as_str()) {
            continue;
        }
        let value = updates.remove(name).unwrap_or_else(|| value.clone());
        merged.insert(name.clone(), value);
    }

    if let Some(fields) = pending {
        merged.extend(fields);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ConceptSchema, FieldType, MappingCatalog};
    use serde_json::{json, Value};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn keys(row: &Row) -> Vec<&str> {
        row.keys().map(String::as_str).collect()
    }

    fn concept(name: &str) -> ConceptSchema {
        ConceptSchema {
            name: name.into(),
            label: None,
            field_type: FieldType::Number,
            description: None,
            unit: None,
            minimum: None,
            maximum: None,
            codes: vec![],
            nullable: true,
        }
    }

    fn mapping(sources: &[&str], targets: &[&str]) -> MappingDefinition {
        MappingDefinition {
            key: "test".into(),
            description: String::new(),
            source_concepts: sources.iter().map(|s| concept(s)).collect(),
            target_concepts: targets.iter().map(|t| concept(t)).collect(),
        }
    }

    /// Routine backed by a Rust closure.
    struct FnRoutine<F>(F);

    impl<F> TransformRoutine for FnRoutine<F>
    where
        F: Fn(Row) -> Result<RoutineOutput, String>,
    {
        fn call(&self, row: Row) -> Result<RoutineOutput, String> {
            (self.0)(row)
        }
    }

    #[test]
    fn test_splices_at_source_position() {
        let m = mapping(&["B"], &["X"]);
        let merged = merge_output(
            &row(json!({"A": 1, "B": 2, "C": 3})),
            &m,
            RoutineOutput::Scalar(json!(20)),
        )
        .unwrap();
        assert_eq!(keys(&merged), vec!["A", "X", "C"]);
        assert_eq!(merged["X"], 20);
    }

    #[test]
    fn test_many_to_one_uses_first_declared_source() {
        let m = mapping(&["S2", "S1"], &["T"]);
        let merged = merge_output(
            &row(json!({"id": 1, "S1": 1, "other": true, "S2": 2, "tail": 0})),
            &m,
            RoutineOutput::Fields(row(json!({"T": 3}))),
        )
        .unwrap();
        assert_eq!(keys(&merged), vec!["id", "other", "T", "tail"]);
    }

    #[test]
    fn test_one_to_many_orders_declared_targets() {
        let m = mapping(&["birth_date"], &["birth_year", "birth_month"]);
        let merged = merge_output(
            &row(json!({"id": 1, "birth_date": "1990-04-02", "sex": 2})),
            &m,
            RoutineOutput::Fields(row(json!({"zz_note": "x", "birth_month": 4, "birth_year": 1990}))),
        )
        .unwrap();
        assert_eq!(
            keys(&merged),
            vec!["id", "birth_year", "birth_month", "zz_note", "sex"]
        );
    }

    #[test]
    fn test_existing_field_is_updated_in_place() {
        let m = mapping(&["B"], &["X"]);
        let merged = merge_output(
            &row(json!({"A": 1, "B": 2, "C": 3})),
            &m,
            RoutineOutput::Fields(row(json!({"A": 10, "C": 30, "X": 20}))),
        )
        .unwrap();
        assert_eq!(keys(&merged), vec!["A", "X", "C"]);
        assert_eq!(merged["A"], 10);
        assert_eq!(merged["C"], 30);
        assert_eq!(merged["X"], 20);
    }

    #[test]
    fn test_echoed_row_keeps_column_order() {
        let m = mapping(&["S1", "S2"], &["T"]);
        let merged = merge_output(
            &row(json!({"id": 7, "S1": 1, "mid": "m", "S2": 2, "tail": true})),
            &m,
            RoutineOutput::Fields(row(json!({"tail": true, "mid": "m", "id": 7, "T": 3}))),
        )
        .unwrap();
        assert_eq!(keys(&merged), vec!["id", "T", "mid", "tail"]);
    }

    #[test]
    fn test_missing_sources_append_at_end() {
        let m = mapping(&["B"], &["X"]);
        let merged =
            merge_output(&row(json!({"A": 1})), &m, RoutineOutput::Scalar(json!(5))).unwrap();
        assert_eq!(keys(&merged), vec!["A", "X"]);
    }

    #[test]
    fn test_scalar_rejected_for_multiple_targets() {
        let m = mapping(&["A"], &["X", "Y"]);
        let err = merge_output(&row(json!({"A": 1})), &m, RoutineOutput::Scalar(json!(1)))
            .unwrap_err();
        assert!(err.contains("2 fields"));
    }

    #[test]
    fn test_nested_value_rejected() {
        let m = mapping(&["A"], &["X"]);
        let err = merge_output(
            &row(json!({"A": 1})),
            &m,
            RoutineOutput::Fields(row(json!({"X": [1, 2]}))),
        )
        .unwrap_err();
        assert!(err.contains("'X'"));
    }

    #[test]
    fn test_nothing_and_empty_object_are_no_value() {
        let m = mapping(&["A"], &["X"]);
        let input = row(json!({"A": 1}));
        assert_eq!(
            merge_output(&input, &m, RoutineOutput::Nothing).unwrap_err(),
            NO_VALUE
        );
        assert_eq!(
            merge_output(&input, &m, RoutineOutput::Fields(Row::new())).unwrap_err(),
            NO_VALUE
        );
    }

    #[test]
    fn test_one_failing_row_is_passed_through() {
        let m = mapping(&["v"], &["w"]);
        let data: Vec<Row> = (0..5).map(|i| row(json!({"id": i, "v": i}))).collect();
        let routine = FnRoutine(|r: Row| {
            if r["id"] == 2 {
                Err("bad row".to_string())
            } else {
                Ok(RoutineOutput::Scalar(json!(r["v"].as_i64().unwrap() * 10)))
            }
        });

        let outcome = RowTransformer::default()
            .apply(&routine, &data, &m, &ConsoleSink::new())
            .unwrap();

        assert_eq!(outcome.stats.total, 5);
        assert_eq!(outcome.stats.succeeded, 4);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.data[2], data[2]);
        assert_eq!(outcome.data[3]["w"], 30);
        assert_eq!(outcome.row_errors[0].row_index, 2);
        assert_eq!(outcome.row_errors[0].message, "bad row");
    }

    #[test]
    fn test_stops_after_threshold() {
        let m = mapping(&["v"], &["w"]);
        let data: Vec<Row> = (0..15).map(|i| row(json!({"v": i}))).collect();
        let routine = FnRoutine(|_: Row| Err("always".to_string()));

        let outcome = RowTransformer::default()
            .apply(&routine, &data, &m, &ConsoleSink::new())
            .unwrap();

        assert_eq!(outcome.stats.failed, 11);
        assert_eq!(outcome.stats.succeeded, 0);
        assert_eq!(outcome.row_errors.len(), 11);
        assert_eq!(outcome.data, data);
        assert!(outcome
            .console_lines
            .last()
            .unwrap()
            .text
            .contains("4 remaining"));
    }

    #[test]
    fn test_routine_cannot_touch_input() {
        let m = mapping(&["v"], &["w"]);
        let data = vec![row(json!({"v": 1}))];
        let routine = FnRoutine(|mut r: Row| {
            r.insert("v".into(), json!(999));
            Ok(RoutineOutput::Scalar(json!(1)))
        });
        RowTransformer::default()
            .apply(&routine, &data, &m, &ConsoleSink::new())
            .unwrap();
        assert_eq!(data[0]["v"], 1);
    }

    #[test]
    fn test_empty_dataset_is_invalid() {
        let catalog = MappingCatalog::builtin().unwrap();
        let m = catalog.get_mapping("Height (in) → Height (cm)").unwrap();
        let routine = FnRoutine(|_: Row| Ok(RoutineOutput::Nothing));
        let err = RowTransformer::default()
            .apply(&routine, &[], m, &ConsoleSink::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidResult(_)));
    }

    #[test]
    fn test_row_count_mismatch_is_invalid() {
        assert!(validate_result(2, &[Row::new()]).is_err());
        assert!(validate_result(1, &[Row::new()]).is_ok());
    }
}
