//! Mapping Catalog - the read-only registry of field mappings.
//!
//! Each entry names the source field(s) it consumes and the target field(s)
//! it produces, with schema metadata for both sides. The metadata documents
//! the value domain; the executor never enforces it.
//!
//! The built-in catalog is embedded at compile time from `catalog/builtin.json`.
//! Another catalog with the same shape can be loaded from disk.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{CatalogError, CatalogResult};

const BUILTIN_CATALOG: &str = include_str!("../../catalog/builtin.json");

// =============================================================================
// Concept schemas
// =============================================================================

/// Declared type of a concept's values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Number,
    String,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
        }
    }
}

/// An enumerated code with its human-readable label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeLabel {
    pub code: Value,
    pub label: String,
}

/// Schema of one field on either side of a mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConceptSchema {
    /// Field name as it appears in rows.
    pub name: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub minimum: Option<f64>,

    #[serde(default)]
    pub maximum: Option<f64>,

    /// Allowed codes; empty means unrestricted.
    #[serde(default)]
    pub codes: Vec<CodeLabel>,

    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

// =============================================================================
// Mapping definitions
// =============================================================================

/// A named correspondence between source and target fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingDefinition {
    /// Display key, e.g. `"A → B"`.
    pub key: String,

    #[serde(default)]
    pub description: String,

    pub source_concepts: Vec<ConceptSchema>,

    pub target_concepts: Vec<ConceptSchema>,
}

impl MappingDefinition {
    /// Source field names in declaration order.
    pub fn source_fields(&self) -> Vec<&str> {
        self.source_concepts.iter().map(|c| c.name.as_str()).collect()
    }

    /// Target field names in declaration order.
    pub fn target_fields(&self) -> Vec<&str> {
        self.target_concepts.iter().map(|c| c.name.as_str()).collect()
    }

    /// `"N→M"` shape of the mapping, for display.
    pub fn cardinality(&self) -> String {
        format!(
            "{}→{}",
            self.source_concepts.len(),
            self.target_concepts.len()
        )
    }

    fn check(&self) -> CatalogResult<()> {
        if self.key.trim().is_empty() {
            return Err(CatalogError::Invalid("mapping with an empty key".into()));
        }
        if self.source_concepts.is_empty() {
            return Err(CatalogError::Invalid(format!(
                "'{}' declares no source concepts",
                self.key
            )));
        }
        if self.target_concepts.is_empty() {
            return Err(CatalogError::Invalid(format!(
                "'{}' declares no target concepts",
                self.key
            )));
        }

        let sources: HashSet<&str> = self.source_fields().into_iter().collect();
        if sources.len() != self.source_concepts.len() {
            return Err(CatalogError::Invalid(format!(
                "'{}' repeats a source field",
                self.key
            )));
        }
        let mut targets = HashSet::new();
        for name in self.target_fields() {
            if sources.contains(name) {
                return Err(CatalogError::Invalid(format!(
                    "'{}' uses '{}' as both source and target",
                    self.key, name
                )));
            }
            if !targets.insert(name) {
                return Err(CatalogError::Invalid(format!(
                    "'{}' repeats target field '{}'",
                    self.key, name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<String>,
    mappings: Vec<MappingDefinition>,
}

/// Ordered, read-only collection of mappings.
#[derive(Debug, Clone)]
pub struct MappingCatalog {
    entries: Vec<MappingDefinition>,
}

impl MappingCatalog {
    /// The catalog shipped with the binary.
    pub fn builtin() -> CatalogResult<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    /// Parse and validate a catalog document.
    pub fn from_json(content: &str) -> CatalogResult<Self> {
        let file: CatalogFile = serde_json::from_str(content)?;
        Self::new(file.mappings)
    }

    /// Load a catalog document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Build a catalog from definitions, rejecting malformed or duplicate entries.
    pub fn new(entries: Vec<MappingDefinition>) -> CatalogResult<Self> {
        let mut keys = HashSet::new();
        for entry in &entries {
            entry.check()?;
            if !keys.insert(entry.key.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate mapping key '{}'",
                    entry.key
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Mapping keys in catalog order.
    pub fn list_mappings(&self) -> Vec<&str> {
        self.entries.iter().map(|m| m.key.as_str()).collect()
    }

    /// Look up a mapping by key.
    pub fn get_mapping(&self, key: &str) -> CatalogResult<&MappingDefinition> {
        self.entries
            .iter()
            .find(|m| m.key == key)
            .ok_or_else(|| CatalogError::NotFound(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingDefinition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
