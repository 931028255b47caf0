//! JSON Schema views of the mapping catalog.
//!
//! Concept metadata is never enforced while a transform runs. This module
//! turns it into JSON Schema (Draft 7) so a dataset can be audited against a
//! mapping after the fact, or the schema handed to other tooling.
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldshift::catalog::MappingCatalog;
//! use fieldshift::validation::{audit_dataset, Side};
//!
//! let catalog = MappingCatalog::builtin()?;
//! let mapping = catalog.get_mapping("Height (in) → Height (cm)")?;
//! let report = audit_dataset(mapping, Side::Target, &rows);
//! println!("{} of {} rows conform", report.valid, report.checked);
//! ```

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::catalog::{ConceptSchema, FieldType, MappingDefinition};
use crate::models::Row;

/// Which side of a mapping to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Side {
    Source,
    #[default]
    Target,
}

/// Validate `data` against `schema`, collecting every error message.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator =
        jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Schema of a single field value.
pub fn concept_schema(concept: &ConceptSchema) -> Value {
    let mut schema = Map::new();

    let base = concept.field_type.as_str();
    schema.insert(
        "type".into(),
        if concept.nullable {
            json!([base, "null"])
        } else {
            json!(base)
        },
    );
    if let Some(label) = &concept.label {
        schema.insert("title".into(), json!(label));
    }
    if let Some(description) = &concept.description {
        schema.insert("description".into(), json!(description));
    }

    if matches!(concept.field_type, FieldType::Integer | FieldType::Number) {
        if let Some(minimum) = concept.minimum {
            schema.insert("minimum".into(), json!(minimum));
        }
        if let Some(maximum) = concept.maximum {
            schema.insert("maximum".into(), json!(maximum));
        }
    }

    if !concept.codes.is_empty() {
        let mut allowed: Vec<Value> = concept.codes.iter().map(|c| c.code.clone()).collect();
        if concept.nullable {
            allowed.push(Value::Null);
        }
        schema.insert("enum".into(), Value::Array(allowed));
    }

    Value::Object(schema)
}

/// Object schema for one side of a mapping. Declared fields are required;
/// other fields are allowed.
pub fn mapping_schema(mapping: &MappingDefinition, side: Side) -> Value {
    let concepts = match side {
        Side::Source => &mapping.source_concepts,
        Side::Target => &mapping.target_concepts,
    };

    let properties: Map<String, Value> = concepts
        .iter()
        .map(|c| (c.name.clone(), concept_schema(c)))
        .collect();
    let required: Vec<&str> = concepts.iter().map(|c| c.name.as_str()).collect();

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": mapping.key,
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": true
    })
}

// =============================================================================
// Dataset audit
// =============================================================================

/// Schema violations found in one row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowIssues {
    pub row_index: usize,
    pub errors: Vec<String>,
}

/// Advisory report; nothing here blocks a commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub mapping: String,
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
    pub issues: Vec<RowIssues>,
}

/// Check every row against one side of `mapping`.
pub fn audit_dataset(mapping: &MappingDefinition, side: Side, rows: &[Row]) -> AuditReport {
    audit_with(&mapping.key, &mapping_schema(mapping, side), rows)
}

/// One validator for the whole dataset. A schema that does not compile is
/// reported against every row.
fn audit_with(key: &str, schema: &Value, rows: &[Row]) -> AuditReport {
    let issues: Vec<RowIssues> = match jsonschema::draft7::new(schema) {
        Ok(validator) => rows
            .iter()
            .enumerate()
            .filter_map(|(row_index, row)| {
                let instance = Value::Object(row.clone());
                let errors: Vec<String> = validator
                    .iter_errors(&instance)
                    .map(|e| e.to_string())
                    .collect();
                (!errors.is_empty()).then_some(RowIssues { row_index, errors })
            })
            .collect(),
        Err(e) => {
            let message = format!("Invalid schema: {}", e);
            (0..rows.len())
                .map(|row_index| RowIssues {
                    row_index,
                    errors: vec![message.clone()],
                })
                .collect()
        }
    };

    AuditReport {
        mapping: key.to_string(),
        checked: rows.len(),
        valid: rows.len() - issues.len(),
        invalid: issues.len(),
        issues,
    }
}
