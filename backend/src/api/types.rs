//! REST API request and response types.
//!
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::catalog::MappingDefinition;
use crate::models::TransformOutcome;
use crate::sandbox::Backend;
use crate::session::RunOutcome;
use crate::transform::{summarize, Applicability};
use crate::validation::{mapping_schema, Side};

/// Body of `POST /api/select`.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectRequest {
    pub key: String,
}

/// Body of `POST /api/run`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub code: String,
    /// Overrides the configured backend for this run.
    #[serde(default)]
    pub backend: Option<Backend>,
}

/// Query of `GET /api/export`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// One entry of `GET /api/mappings`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSummary {
    pub key: String,
    pub description: String,
    /// e.g. `"2→1"`
    pub cardinality: String,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    /// Against the current data.
    pub applicable: bool,
}

impl MappingSummary {
    pub fn new(mapping: &MappingDefinition, applicable: bool) -> Self {
        Self {
            key: mapping.key.clone(),
            description: mapping.description.clone(),
            cardinality: mapping.cardinality(),
            sources: mapping.source_fields().into_iter().map(String::from).collect(),
            targets: mapping.target_fields().into_iter().map(String::from).collect(),
            applicable,
        }
    }
}

/// `GET /api/mappings/{key}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingDetail {
    pub mapping: MappingDefinition,
    pub applicability: Applicability,
    pub source_schema: Value,
    pub target_schema: Value,
}

impl MappingDetail {
    pub fn new(mapping: &MappingDefinition, applicability: Applicability) -> Self {
        Self {
            source_schema: mapping_schema(mapping, Side::Source),
            target_schema: mapping_schema(mapping, Side::Target),
            mapping: mapping.clone(),
            applicability,
        }
    }
}

/// Reply of `POST /api/run`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    /// Unique run identifier
    pub run_id: String,

    /// "ok", "warning" (some rows failed) or "not_applicable"
    pub status: String,

    pub backend: Backend,

    /// Absent when the mapping did not apply.
    pub outcome: Option<TransformOutcome>,

    /// Human-readable lines describing the outcome
    pub summary: Vec<String>,

    pub notice: Option<String>,

    pub undo_available: bool,
}

impl RunResponse {
    pub fn new(outcome: RunOutcome, backend: Backend, undo_available: bool) -> Self {
        let run_id = Uuid::new_v4().to_string();
        match outcome {
            RunOutcome::Completed(outcome) => Self {
                run_id,
                status: if outcome.stats.failed == 0 { "ok" } else { "warning" }.to_string(),
                backend,
                summary: summarize(&outcome),
                outcome: Some(outcome),
                notice: None,
                undo_available,
            },
            RunOutcome::NotApplicable { notice } => Self {
                run_id,
                status: "not_applicable".to_string(),
                backend,
                outcome: None,
                summary: vec![notice.clone()],
                notice: Some(notice),
                undo_available,
            },
        }
    }
}

/// Reply of `POST /api/undo`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoResponse {
    pub undone: bool,
    pub message: String,
    pub undo_available: bool,
}

/// Create an error response
pub fn error_response(kind: &str, error: &str) -> Value {
    json!({
        "status": "error",
        "kind": kind,
        "error": error,
    })
}
