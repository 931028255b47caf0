//! Result Reporter - packages counters, row errors and console output.

use crate::models::{ConsoleLevel, ConsoleLine, Dataset, RowError, RunStats, TransformOutcome};

/// How many row errors [`summarize`] spells out before eliding the rest.
const SUMMARY_ERROR_LIMIT: usize = 5;

/// Accumulates per-row results while a run is in progress.
#[derive(Debug, Default)]
pub struct Reporter {
    stats: RunStats,
    row_errors: Vec<RowError>,
    notes: Vec<ConsoleLine>,
}

impl Reporter {
    pub fn new(total: usize) -> Self {
        Self {
            stats: RunStats {
                total,
                ..RunStats::default()
            },
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.stats.succeeded += 1;
    }

    pub fn record_failure(&mut self, row_index: usize, message: impl Into<String>) {
        self.stats.failed += 1;
        self.row_errors.push(RowError {
            row_index,
            message: message.into(),
        });
    }

    pub fn failed(&self) -> usize {
        self.stats.failed
    }

    /// Record that processing stopped after `row_index`, leaving `remaining`
    /// rows untouched.
    pub fn note_early_stop(&mut self, row_index: usize, remaining: usize) {
        self.notes.push(ConsoleLine::new(
            ConsoleLevel::Error,
            format!(
                "Stopped after {} failed rows (last failure at row {}); {} remaining rows left unchanged",
                self.stats.failed, row_index, remaining
            ),
        ));
    }

    /// Build the outcome. User console lines come first, engine notes after.
    pub fn finish(self, data: Dataset, mut console_lines: Vec<ConsoleLine>) -> TransformOutcome {
        console_lines.extend(self.notes);
        TransformOutcome {
            data,
            console_lines,
            stats: self.stats,
            row_errors: self.row_errors,
        }
    }
}

/// Human-readable lines describing an outcome.
pub fn summarize(outcome: &TransformOutcome) -> Vec<String> {
    let stats = outcome.stats;
    let mut lines = vec![format!(
        "Rows: {} total, {} succeeded, {} failed",
        stats.total, stats.succeeded, stats.failed
    )];

    for error in outcome.row_errors.iter().take(SUMMARY_ERROR_LIMIT) {
        lines.push(format!("  row {}: {}", error.row_index, error.message));
    }
    if outcome.row_errors.len() > SUMMARY_ERROR_LIMIT {
        lines.push(format!(
            "  ... +{} more row errors",
            outcome.row_errors.len() - SUMMARY_ERROR_LIMIT
        ));
    }

    let unprocessed = stats.total.saturating_sub(stats.succeeded + stats.failed);
    if unprocessed > 0 {
        lines.push(format!("{} rows were not processed", unprocessed));
    }
    lines
}
