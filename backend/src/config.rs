//! Engine configuration.
//!
//! Values come from the process environment (the binary loads `.env` first
//! through `dotenvy`) and may then be overridden by command-line flags.
//!
//! | Variable                      | Default  |
//! |-------------------------------|----------|
//! | `FIELDSHIFT_BACKEND`          | `native` |
//! | `FIELDSHIFT_MAX_ROW_FAILURES` | `10`     |
//! | `FIELDSHIFT_CATALOG`          | built-in |
//! | `FIELDSHIFT_PORT`             | `3000`   |

use std::path::PathBuf;
use std::str::FromStr;

use crate::catalog::MappingCatalog;
use crate::error::{CatalogResult, ConfigError};
use crate::sandbox::Backend;
use crate::transform::DEFAULT_MAX_ROW_FAILURES;

pub const ENV_BACKEND: &str = "FIELDSHIFT_BACKEND";
pub const ENV_MAX_ROW_FAILURES: &str = "FIELDSHIFT_MAX_ROW_FAILURES";
pub const ENV_CATALOG: &str = "FIELDSHIFT_CATALOG";
pub const ENV_PORT: &str = "FIELDSHIFT_PORT";

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Backend used when a run does not name one.
    pub backend: Backend,
    /// Failed rows tolerated before a run stops early.
    pub max_row_failures: usize,
    /// Catalog file replacing the built-in catalog.
    pub catalog_path: Option<PathBuf>,
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            max_row_failures: DEFAULT_MAX_ROW_FAILURES,
            catalog_path: None,
            port: DEFAULT_PORT,
        }
    }
}

impl EngineConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = non_empty(lookup(ENV_BACKEND)) {
            config.backend = parse(ENV_BACKEND, &value)?;
        }
        if let Some(value) = non_empty(lookup(ENV_MAX_ROW_FAILURES)) {
            config.max_row_failures = parse(ENV_MAX_ROW_FAILURES, &value)?;
        }
        if let Some(value) = non_empty(lookup(ENV_CATALOG)) {
            config.catalog_path = Some(PathBuf::from(value));
        }
        if let Some(value) = non_empty(lookup(ENV_PORT)) {
            config.port = parse(ENV_PORT, &value)?;
        }

        Ok(config)
    }

    /// The configured catalog, or the built-in one.
    pub fn load_catalog(&self) -> CatalogResult<MappingCatalog> {
        match &self.catalog_path {
            Some(path) => MappingCatalog::from_file(path),
            None => MappingCatalog::builtin(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}
