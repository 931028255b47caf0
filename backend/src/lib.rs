//! # fieldshift - sandboxed field-mapping transformations with undo
//!
//! A user writes a small `transform` routine that maps the source field(s) of
//! a catalog mapping to its target field(s). fieldshift compiles it inside a
//! restricted interpreter, runs it over every row, splices the produced fields
//! in place of the sources and keeps the previous version for a single undo.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Catalog  │──▶│ Applicability│──▶│  Sandbox   │──▶│    Rows      │──▶│ Session  │
//! │ (mappings)│   │   (gate)     │   │(rhai / lua)│   │(merge/splice)│   │(versions)│
//! └───────────┘   └──────────────┘   └────────────┘   └──────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fieldshift::{EngineConfig, MappingCatalog, RunOutcome, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rows = fieldshift::parser::load_file("people.csv")?.rows;
//!     let session = Session::new(MappingCatalog::builtin()?, rows, &EngineConfig::default())?;
//!
//!     session.select_mapping("Height (in) → Height (cm)")?;
//!     let code = "fn transform(row) { #{ height_cm: row.height_in * 2.54 } }";
//!     if let RunOutcome::Completed(outcome) = session.run_transform(code).await? {
//!         println!("{} rows converted", outcome.stats.succeeded);
//!     }
//!     session.undo()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Rows, outcomes, column discovery
//! - [`catalog`] - Mapping catalog
//! - [`sandbox`] - Restricted interpreters (native Rhai, embedded Lua)
//! - [`transform`] - Applicability, row merging, reporting
//! - [`session`] - Dataset versions, undo and reset
//! - [`parser`] - CSV/JSON loading with auto-detection
//! - [`export`] - CSV/JSON download
//! - [`validation`] - JSON Schema audit of concept metadata
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Catalog
pub mod catalog;

// Execution
pub mod sandbox;
pub mod session;
pub mod transform;

// Input / output
pub mod export;
pub mod parser;

// Validation
pub mod validation;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    CatalogError, ConfigError, DatasetError, EngineError, SandboxError, ServerError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    ColumnInfo, ConsoleLevel, ConsoleLine, Dataset, Row, RowError, RunStats, TransformOutcome,
    ValueKind,
};

// =============================================================================
// Re-exports - Engine
// =============================================================================

pub use catalog::{MappingCatalog, MappingDefinition};
pub use config::EngineConfig;
pub use sandbox::{Backend, Executor};
pub use session::{DatasetChanged, RunOutcome, Selection, Session, UndoOutcome};
pub use transform::{is_applicable, RowTransformer};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server};
}
