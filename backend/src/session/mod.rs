//! Session facade - one dataset, one catalog, one run at a time.
//!
//! ```text
//! select_mapping ──▶ applicability ──▶ (reset if stale)
//! run_transform  ──▶ applicability gate ──▶ blocking pool: compile + rows ──▶ commit
//! undo / reset   ──▶ ExecutionState
//! ```
//!
//! A [`Session`] is cheap to clone and all clones share state. Every change to
//! the current dataset is published as a [`DatasetChanged`] event.

pub mod state;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

pub use state::{ExecutionState, UndoOutcome};

use crate::api::logs::{log_error, log_info, log_success, log_warning};
use crate::catalog::{MappingCatalog, MappingDefinition};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{discover_columns, ColumnInfo, Dataset, TransformOutcome};
use crate::sandbox::{Backend, ConsoleSink, Executor};
use crate::transform::{assess, Applicability, RowTransformer};

const EVENT_CAPACITY: usize = 16;

// =============================================================================
// Events and replies
// =============================================================================

/// Why the current dataset changed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeReason {
    Commit,
    Undo,
    Reset,
}

/// Pushed to subscribers whenever the current dataset changes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetChanged {
    pub reason: ChangeReason,
    pub data: Dataset,
    pub columns: Vec<ColumnInfo>,
    pub undo_available: bool,
    pub at: DateTime<Utc>,
}

/// Reply to [`Session::select_mapping`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub key: String,
    pub applicable: bool,
    /// The data was reset to the original because the mapping no longer fit.
    pub reset: bool,
    pub notice: Option<String>,
    pub applicability: Applicability,
}

/// Reply to [`Session::run_transform`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(TransformOutcome),
    /// The mapping did not fit the current data; the data was reset instead.
    NotApplicable { notice: String },
}

/// Read-only view of the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub data: Dataset,
    pub columns: Vec<ColumnInfo>,
    pub undo_available: bool,
    pub selected_mapping: Option<String>,
    pub last_executed_code: Option<String>,
}

// =============================================================================
// Session
// =============================================================================

#[derive(Clone)]
pub struct Session {
    catalog: Arc<MappingCatalog>,
    executor: Executor,
    transformer: RowTransformer,
    default_backend: Backend,
    state: Arc<Mutex<ExecutionState>>,
    running: Arc<AtomicBool>,
    events: broadcast::Sender<DatasetChanged>,
}

impl Session {
    /// Start a session over `original`, which must not be empty.
    pub fn new(
        catalog: MappingCatalog,
        original: Dataset,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        let state = ExecutionState::new(original)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            catalog: Arc::new(catalog),
            executor: Executor::new(),
            transformer: RowTransformer::new(config.max_row_failures),
            default_backend: config.backend,
            state: Arc::new(Mutex::new(state)),
            running: Arc::new(AtomicBool::new(false)),
            events,
        })
    }

    pub fn catalog(&self) -> &MappingCatalog {
        &self.catalog
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn default_backend(&self) -> Backend {
        self.default_backend
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatasetChanged> {
        self.events.subscribe()
    }

    /// Select a mapping and check it against the current data.
    ///
    /// When it does not fit and the data has been transformed, the data is
    /// reset to the original and checked again.
    pub fn select_mapping(&self, key: &str) -> EngineResult<Selection> {
        let _flight = FlightGuard::acquire(&self.running)?;
        let mapping = self.catalog.get_mapping(key)?;

        let mut state = self.lock_state();
        state.select(key);

        let mut applicability = assess(mapping, state.current());
        let mut reset = false;
        let mut notice = None;

        if !applicability.applicable && state.current() != state.original() {
            let reason = applicability.reason();
            state.reset_to_original();
            self.publish(&state, ChangeReason::Reset);
            reset = true;
            notice = Some(format!(
                "'{}' does not apply to the current data ({}); data reset to the original",
                key, reason
            ));
            applicability = assess(mapping, state.current());
        }
        if !applicability.applicable && notice.is_none() {
            notice = Some(format!("'{}' is not applicable: {}", key, applicability.reason()));
        }

        log_info(format!("Selected mapping '{}'", key));
        Ok(Selection {
            key: key.to_string(),
            applicable: applicability.applicable,
            reset,
            notice,
            applicability,
        })
    }

    /// Run `code` with the default backend.
    pub async fn run_transform(&self, code: &str) -> EngineResult<RunOutcome> {
        self.run_transform_with(code, self.default_backend).await
    }

    /// Run `code` against the current data and commit the result.
    ///
    /// Rejected with [`EngineError::Busy`] while another run is in flight.
    /// Compilation, readiness and result-shape failures leave the data as-is.
    ///
    /// Dropping the returned future does not end the flight: the session
    /// stays busy until the blocking work has finished.
    pub async fn run_transform_with(
        &self,
        code: &str,
        backend: Backend,
    ) -> EngineResult<RunOutcome> {
        let flight = FlightGuard::acquire(&self.running)?;

        let (mapping, snapshot) = {
            let mut state = self.lock_state();
            let key = state
                .selected_mapping()
                .ok_or(EngineError::NoMappingSelected)?
                .to_string();
            let mapping = self.catalog.get_mapping(&key)?.clone();

            let applicability = assess(&mapping, state.current());
            if !applicability.applicable {
                let notice = if state.current() != state.original() {
                    state.reset_to_original();
                    self.publish(&state, ChangeReason::Reset);
                    format!(
                        "'{}' is not applicable ({}); data reset to the original",
                        key,
                        applicability.reason()
                    )
                } else {
                    format!("'{}' is not applicable: {}", key, applicability.reason())
                };
                log_warning(notice.clone());
                return Ok(RunOutcome::NotApplicable { notice });
            }
            (mapping, state.current().to_vec())
        };

        log_info(format!(
            "Running '{}' on {} rows with the {} backend",
            mapping.key,
            snapshot.len(),
            backend
        ));

        let key = mapping.key.clone();
        let (outcome, _flight) = self
            .execute(code, backend, mapping, snapshot, flight)
            .await
            .inspect_err(|e| log_error(format!("Run of '{}' failed: {}", key, e)))?;

        let mut state = self.lock_state();
        state.commit(outcome.data.clone(), code);
        self.publish(&state, ChangeReason::Commit);
        log_success(format!(
            "Committed {} rows ({} succeeded, {} failed)",
            outcome.stats.total, outcome.stats.succeeded, outcome.stats.failed
        ));

        Ok(RunOutcome::Completed(outcome))
    }

    /// Compile and iterate on the blocking pool.
    ///
    /// The guard moves into the blocking task and comes back with the outcome.
    async fn execute(
        &self,
        code: &str,
        backend: Backend,
        mapping: MappingDefinition,
        snapshot: Dataset,
        flight: FlightGuard,
    ) -> EngineResult<(TransformOutcome, FlightGuard)> {
        let executor = self.executor.clone();
        let transformer = self.transformer;
        let code = code.to_string();

        tokio::task::spawn_blocking(move || -> EngineResult<(TransformOutcome, FlightGuard)> {
            let console = ConsoleSink::new();
            let routine = executor.compile(&code, backend, console.clone())?;
            let outcome = transformer.apply(routine.as_ref(), &snapshot, &mapping, &console)?;
            Ok((outcome, flight))
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))?
    }

    /// Restore the version before the last commit.
    pub fn undo(&self) -> EngineResult<UndoOutcome> {
        let _flight = FlightGuard::acquire(&self.running)?;
        let mut state = self.lock_state();
        let outcome = state.undo();
        match outcome {
            UndoOutcome::Undone => {
                self.publish(&state, ChangeReason::Undo);
                log_info("Undid the last transformation");
            }
            UndoOutcome::NothingToUndo => debug!("undo requested with nothing to undo"),
        }
        Ok(outcome)
    }

    pub fn reset_to_original(&self) -> EngineResult<()> {
        let _flight = FlightGuard::acquire(&self.running)?;
        let mut state = self.lock_state();
        state.reset_to_original();
        self.publish(&state, ChangeReason::Reset);
        log_info("Reset data to the original");
        Ok(())
    }

    pub fn current_data(&self) -> Dataset {
        self.lock_state().current().to_vec()
    }

    pub fn original_data(&self) -> Dataset {
        self.lock_state().original().to_vec()
    }

    pub fn undo_available(&self) -> bool {
        self.lock_state().undo_available()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock_state();
        SessionSnapshot {
            data: state.current().to_vec(),
            columns: discover_columns(state.current()),
            undo_available: state.undo_available(),
            selected_mapping: state.selected_mapping().map(str::to_string),
            last_executed_code: state.last_executed_code().map(str::to_string),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ExecutionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &ExecutionState, reason: ChangeReason) {
        let event = DatasetChanged {
            reason,
            data: state.current().to_vec(),
            columns: discover_columns(state.current()),
            undo_available: state.undo_available(),
            at: Utc::now(),
        };
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Holds the single-flight flag for the lifetime of one operation.
struct FlightGuard {
    flag: Arc<AtomicBool>,
}

impl FlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> EngineResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::Busy)?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
