//! Console proxy handed to user code.
//!
//! Lines are collected in call order and returned with the outcome.
//! Pushing never fails and nothing is forwarded to host logging.

use std::sync::{Arc, Mutex, PoisonError};

use crate::models::{ConsoleLevel, ConsoleLine};

/// Upper bound on captured lines per run.
pub const MAX_CONSOLE_LINES: usize = 5_000;

#[derive(Debug, Default)]
struct Buffer {
    lines: Vec<ConsoleLine>,
    dropped: usize,
}

/// Shared, append-only buffer of console lines.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    buffer: Arc<Mutex<Buffer>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: ConsoleLevel, text: impl Into<String>) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.lines.len() < MAX_CONSOLE_LINES {
            buffer.lines.push(ConsoleLine::new(level, text));
        } else {
            buffer.dropped += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lines
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain everything captured so far.
    ///
    /// If the cap was hit, a final warning line reports how many were dropped.
    pub fn take(&self) -> Vec<ConsoleLine> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut lines = std::mem::take(&mut buffer.lines);
        if buffer.dropped > 0 {
            lines.push(ConsoleLine::new(
                ConsoleLevel::Warn,
                format!("{} further console lines were dropped", buffer.dropped),
            ));
            buffer.dropped = 0;
        }
        lines
    }
}
