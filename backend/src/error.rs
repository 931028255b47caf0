//! Error types for the fieldshift engine.
//!
//! - [`CatalogError`] - mapping catalog loading and lookup
//! - [`SandboxError`] - compiling user code and backend readiness
//! - [`EngineError`] - top-level run/undo/reset orchestration
//! - [`DatasetError`] - loading and exporting datasets
//! - [`ConfigError`] - environment and flag parsing
//! - [`ServerError`] - HTTP surface
//!
//! Conversions are `From` based so `?` works across layers.
//! Per-row failures are not errors: they are recorded as
//! [`crate::models::RowError`] entries inside the outcome.

use thiserror::Error;

use crate::sandbox::Backend;

// =============================================================================
// Catalog Errors
// =============================================================================

/// Errors from the mapping catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No mapping registered under this key.
    #[error("Mapping not found: {0}")]
    NotFound(String),

    /// Catalog content violates a structural rule.
    #[error("Invalid catalog: {0}")]
    Invalid(String),

    /// Failed to read a catalog file.
    #[error("Catalog IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file is not valid JSON for the catalog shape.
    #[error("Catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Sandbox Errors
// =============================================================================

/// Errors raised before any row is processed.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// User code does not parse, fails to evaluate, or lacks `transform`.
    #[error("{0}")]
    Compilation(String),

    /// The selected backend has not finished bootstrapping.
    #[error("The {0} backend is not ready yet, retry shortly")]
    BackendNotReady(Backend),

    /// Interpreter bootstrap failed; the backend stays unavailable.
    #[error("Backend bootstrap failed: {0}")]
    Bootstrap(String),
}

// =============================================================================
// Engine Errors (top-level)
// =============================================================================

/// Errors returned by [`crate::session::Session`] operations.
///
/// Every variant leaves the session's data untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Compilation or readiness failure; the message is the raw diagnostic.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The produced dataset is empty or does not line up with the input.
    #[error("Invalid result: {0}")]
    InvalidResult(String),

    /// Another transform is already in flight.
    #[error("A transformation is already running")]
    Busy,

    /// `run_transform` was called before any mapping was selected.
    #[error("No mapping selected")]
    NoMappingSelected,

    /// The session cannot start from an empty dataset.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// The execution task died before replying.
    #[error("Execution worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    /// Whether this is a compile-time failure of the user's code.
    pub fn is_compilation(&self) -> bool {
        matches!(self, EngineError::Sandbox(SandboxError::Compilation(_)))
    }
}

// =============================================================================
// Dataset Errors
// =============================================================================

/// Errors while loading or exporting a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Line-level parse failure with context.
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Dataset file is empty")]
    Empty,

    #[error("No headers found in CSV")]
    NoHeaders,

    /// JSON input was not an array of flat objects.
    #[error("Not a list of rows: {0}")]
    NotRows(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors while assembling [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {message}")]
    Invalid {
        key: String,
        value: String,
        message: String,
    },
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

pub type CatalogResult<T> = Result<T, CatalogError>;

pub type SandboxResult<T> = Result<T, SandboxError>;

pub type EngineResult<T> = Result<T, EngineError>;

pub type DatasetResult<T> = Result<T, DatasetError>;

pub type ServerResult<T> = Result<T, ServerError>;
