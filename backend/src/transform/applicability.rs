//! Applicability Checker.
//!
//! A mapping applies when its source fields are all present and none of its
//! target fields are. Only the first row is inspected: datasets are treated as
//! field-homogeneous. This is a heuristic, not a provenance record.

use serde::Serialize;

use crate::catalog::{MappingCatalog, MappingDefinition};
use crate::models::Row;

/// Why a mapping does or does not apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Applicability {
    pub applicable: bool,
    pub missing_sources: Vec<String>,
    pub present_targets: Vec<String>,
    pub empty_dataset: bool,
}

impl Applicability {
    /// Short explanation suitable for a user-facing notice.
    pub fn reason(&self) -> String {
        if self.applicable {
            return "mapping applies to the current data".to_string();
        }
        if self.empty_dataset {
            return "dataset is empty".to_string();
        }
        let mut parts = Vec::new();
        if !self.present_targets.is_empty() {
            parts.push(format!(
                "target field(s) already present: {}",
                self.present_targets.join(", ")
            ));
        }
        if !self.missing_sources.is_empty() {
            parts.push(format!(
                "source field(s) missing: {}",
                self.missing_sources.join(", ")
            ));
        }
        parts.join("; ")
    }
}

/// Inspect the first row against the mapping's declared fields.
pub fn assess(mapping: &MappingDefinition, dataset: &[Row]) -> Applicability {
    let Some(sample) = dataset.first() else {
        return Applicability {
            empty_dataset: true,
            ..Applicability::default()
        };
    };

    let missing_sources: Vec<String> = mapping
        .source_fields()
        .into_iter()
        .filter(|name| !sample.contains_key(*name))
        .map(str::to_string)
        .collect();
    let present_targets: Vec<String> = mapping
        .target_fields()
        .into_iter()
        .filter(|name| sample.contains_key(*name))
        .map(str::to_string)
        .collect();

    Applicability {
        applicable: missing_sources.is_empty() && present_targets.is_empty(),
        missing_sources,
        present_targets,
        empty_dataset: false,
    }
}

pub fn is_applicable(mapping: &MappingDefinition, dataset: &[Row]) -> bool {
    assess(mapping, dataset).applicable
}

/// Check by key; an unknown key is never applicable.
pub fn is_applicable_key(catalog: &MappingCatalog, key: &str, dataset: &[Row]) -> bool {
    catalog
        .get_mapping(key)
        .map(|mapping| is_applicable(mapping, dataset))
        .unwrap_or(false)
}
