//! Dataset Version Manager state.
//!
//! Holds the three dataset versions plus the selection and the code of the
//! last commit. Every version is an owned deep copy: nothing handed out or
//! taken in is shared with another version.

use std::mem;

use crate::error::{EngineError, EngineResult};
use crate::models::{Dataset, Row};

/// Result of [`ExecutionState::undo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    Undone,
    NothingToUndo,
}

#[derive(Debug, Clone)]
pub struct ExecutionState {
    original: Dataset,
    current: Dataset,
    previous: Option<Dataset>,
    last_executed_code: Option<String>,
    selected_mapping: Option<String>,
}

impl ExecutionState {
    /// Start a session from `original`. It must hold at least one row.
    pub fn new(original: Dataset) -> EngineResult<Self> {
        if original.is_empty() {
            return Err(EngineError::EmptyDataset);
        }
        Ok(Self {
            current: original.clone(),
            original,
            previous: None,
            last_executed_code: None,
            selected_mapping: None,
        })
    }

    pub fn original(&self) -> &[Row] {
        &self.original
    }

    pub fn current(&self) -> &[Row] {
        &self.current
    }

    pub fn previous(&self) -> Option<&[Row]> {
        self.previous.as_deref()
    }

    pub fn last_executed_code(&self) -> Option<&str> {
        self.last_executed_code.as_deref()
    }

    pub fn selected_mapping(&self) -> Option<&str> {
        self.selected_mapping.as_deref()
    }

    pub fn undo_available(&self) -> bool {
        self.previous.is_some()
    }

    pub fn select(&mut self, key: impl Into<String>) {
        self.selected_mapping = Some(key.into());
    }

    /// Make `data` current. The outgoing current version becomes `previous`.
    pub fn commit(&mut self, data: Dataset, code: impl Into<String>) {
        let outgoing = mem::replace(&mut self.current, data);
        self.previous = Some(outgoing);
        self.last_executed_code = Some(code.into());
    }

    /// Restore `previous`, single level.
    pub fn undo(&mut self) -> UndoOutcome {
        match self.previous.take() {
            Some(previous) => {
                self.current = previous;
                self.last_executed_code = None;
                UndoOutcome::Undone
            }
            None => UndoOutcome::NothingToUndo,
        }
    }

    /// Discard every commit and start over from a fresh copy of the original.
    pub fn reset_to_original(&mut self) {
        self.current = self.original.clone();
        self.previous = None;
        self.last_executed_code = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: &[i64]) -> Dataset {
        values
            .iter()
            .map(|v| json!({ "v": v }).as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_rejects_empty_dataset() {
        assert!(matches!(
            ExecutionState::new(vec![]),
            Err(EngineError::EmptyDataset)
        ));
    }

    #[test]
    fn test_commit_then_undo() {
        let mut state = ExecutionState::new(rows(&[1])).unwrap();
        assert!(!state.undo_available());

        state.commit(rows(&[2]), "code");
        assert_eq!(state.current(), rows(&[2]).as_slice());
        assert_eq!(state.previous(), Some(rows(&[1]).as_slice()));
        assert_eq!(state.last_executed_code(), Some("code"));

        assert_eq!(state.undo(), UndoOutcome::Undone);
        assert_eq!(state.current(), rows(&[1]).as_slice());
        assert!(state.last_executed_code().is_none());
        assert_eq!(state.undo(), UndoOutcome::NothingToUndo);
        assert_eq!(state.current(), rows(&[1]).as_slice());
    }

    #[test]
    fn test_undo_is_single_level() {
        let mut state = ExecutionState::new(rows(&[1])).unwrap();
        state.commit(rows(&[2]), "a");
        state.commit(rows(&[3]), "b");

        assert_eq!(state.undo(), UndoOutcome::Undone);
        assert_eq!(state.current(), rows(&[2]).as_slice());
        assert_eq!(state.undo(), UndoOutcome::NothingToUndo);
    }

    #[test]
    fn test_reset_restores_original() {
        let mut state = ExecutionState::new(rows(&[1])).unwrap();
        state.select("m");
        state.commit(rows(&[2]), "a");
        state.reset_to_original();

        assert_eq!(state.current(), rows(&[1]).as_slice());
        assert!(!state.undo_available());
        assert!(state.last_executed_code().is_none());
        assert_eq!(state.selected_mapping(), Some("m"));
    }

    #[test]
    fn test_original_never_changes() {
        let mut state = ExecutionState::new(rows(&[1])).unwrap();
        state.commit(rows(&[2]), "a");
        state.commit(rows(&[3]), "b");
        state.reset_to_original();
        state.commit(rows(&[4]), "c");
        assert_eq!(state.original(), rows(&[1]).as_slice());
    }
}
