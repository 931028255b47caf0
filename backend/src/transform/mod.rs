//! Transformation module.
//!
//! - Applicability: does a mapping fit the current data
//! - Rows: run a routine over every row and splice the results in
//! - Report: counters, row errors and console output for one run

pub mod applicability;
pub mod report;
pub mod rows;

pub use applicability::{assess, is_applicable, is_applicable_key, Applicability};
pub use report::{summarize, Reporter};
pub use rows::{merge_output, validate_result, RowTransformer, DEFAULT_MAX_ROW_FAILURES};
