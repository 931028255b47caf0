//! Sandboxed Executor - turns a code string into a callable transform routine.
//!
//! Two backends share one contract:
//!
//! - [`Backend::Native`] - Rhai, built from an empty engine plus an explicit
//!   list of packages. Ready immediately.
//! - [`Backend::Embedded`] - Lua 5.4 with a statistical prelude. Needs a
//!   one-time asynchronous bootstrap before it accepts code.
//!
//! ```text
//! code ──▶ Executor::compile ──▶ Box<dyn TransformRoutine> ──▶ call(row) ──▶ RoutineOutput
//!                 │
//!                 └── fresh evaluation scope: allowlisted helpers + console proxy
//! ```
//!
//! User code must define a unary `transform` routine. It may return an object
//! keyed by target field, a bare scalar, or nothing.

pub mod console;
pub mod embedded;
pub mod native;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub use console::ConsoleSink;
pub use embedded::EmbeddedRuntime;

use crate::error::{SandboxError, SandboxResult};
use crate::models::Row;

/// Name user code must bind its routine to.
pub const ENTRY_POINT: &str = "transform";

// =============================================================================
// Backend selection
// =============================================================================

/// Which interpreter compiles and runs the user's code.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Native,
    Embedded,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Native => "native",
            Backend::Embedded => "embedded",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "native" | "rhai" => Ok(Backend::Native),
            "embedded" | "lua" => Ok(Backend::Embedded),
            other => Err(format!("unknown backend '{}' (expected native or embedded)", other)),
        }
    }
}

// =============================================================================
// Routine contract
// =============================================================================

/// What a routine produced for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutineOutput {
    /// An object keyed by output field name.
    Fields(Row),
    /// A bare value, meaningful only for single-target mappings.
    Scalar(Value),
    /// `null` / nothing.
    Nothing,
}

impl RoutineOutput {
    /// Classify a returned value once it has been converted to JSON.
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(RoutineOutput::Nothing),
            Value::Object(fields) => Ok(RoutineOutput::Fields(fields)),
            Value::Array(_) => Err(
                "transform returned a list; return an object keyed by target field or a single value"
                    .to_string(),
            ),
            scalar => Ok(RoutineOutput::Scalar(scalar)),
        }
    }
}

/// A compiled routine. Errors are the raw message of whatever the code raised.
///
/// The row is passed by value so the routine can never reach the caller's copy.
pub trait TransformRoutine {
    fn call(&self, row: Row) -> Result<RoutineOutput, String>;
}

// =============================================================================
// Embedded readiness gate
// =============================================================================

/// Bootstrap state of the embedded backend.
///
/// The bootstrap is a readiness probe: each compile still opens its own
/// interpreter, and `Ready` only carries what the probe learned.
#[derive(Debug, Clone)]
pub enum Readiness {
    Pending,
    Ready(Arc<EmbeddedRuntime>),
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Compiles code for either backend. Cheap to clone; clones share the gate.
#[derive(Debug, Clone)]
pub struct Executor {
    embedded: Arc<watch::Sender<Readiness>>,
}

impl Executor {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Readiness::Pending);
        Self {
            embedded: Arc::new(sender),
        }
    }

    /// Current bootstrap state of the embedded backend.
    pub fn embedded_readiness(&self) -> Readiness {
        self.embedded.borrow().clone()
    }

    /// Interpreter version reported by a successful bootstrap.
    pub fn embedded_version(&self) -> Option<String> {
        match &*self.embedded.borrow() {
            Readiness::Ready(runtime) => Some(runtime.version.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self, backend: Backend) -> bool {
        match backend {
            Backend::Native => true,
            Backend::Embedded => self.embedded.borrow().is_ready(),
        }
    }

    /// Load the Lua interpreter and register its helpers on the blocking pool.
    ///
    /// Idempotent once it has succeeded.
    pub async fn bootstrap_embedded(&self) -> SandboxResult<()> {
        if self.embedded.borrow().is_ready() {
            return Ok(());
        }

        let outcome = tokio::task::spawn_blocking(embedded::bootstrap)
            .await
            .map_err(|e| SandboxError::Bootstrap(e.to_string()))
            .and_then(|result| result);

        match outcome {
            Ok(runtime) => {
                info!(version = %runtime.version, "embedded backend ready");
                self.embedded
                    .send_replace(Readiness::Ready(Arc::new(runtime)));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "embedded backend bootstrap failed");
                self.embedded.send_replace(Readiness::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Start the bootstrap in the background and return immediately.
    pub fn spawn_embedded_bootstrap(&self) -> tokio::task::JoinHandle<()> {
        let executor = self.clone();
        tokio::spawn(async move {
            // Failure is recorded in the gate.
            let _ = executor.bootstrap_embedded().await;
        })
    }

    /// Wait until the embedded bootstrap has finished either way.
    pub async fn wait_embedded(&self) -> SandboxResult<()> {
        let mut receiver = self.embedded.subscribe();
        let state = receiver
            .wait_for(|state| !matches!(state, Readiness::Pending))
            .await
            .map_err(|e| SandboxError::Bootstrap(e.to_string()))?
            .clone();
        match state {
            Readiness::Failed(message) => Err(SandboxError::Bootstrap(message)),
            _ => Ok(()),
        }
    }

    /// Compile `code` into a routine inside a fresh, restricted scope.
    ///
    /// Console output from top-level statements lands in `console` too.
    pub fn compile(
        &self,
        code: &str,
        backend: Backend,
        console: ConsoleSink,
    ) -> SandboxResult<Box<dyn TransformRoutine>> {
        match backend {
            Backend::Native => Ok(Box::new(native::NativeRoutine::compile(code, console)?)),
            Backend::Embedded => match self.embedded_readiness() {
                Readiness::Ready(_) => Ok(Box::new(embedded::EmbeddedRoutine::compile(
                    code, console,
                )?)),
                Readiness::Pending => Err(SandboxError::BackendNotReady(Backend::Embedded)),
                Readiness::Failed(message) => Err(SandboxError::Bootstrap(message)),
            },
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}
