//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, Result};

/// What a placeholder into a not-yet-loaded document renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Leave the placeholder text as written.
    #[default]
    Verbatim,
    /// Replace it with an empty string.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub unresolved_policy: UnresolvedPolicy,

    /// Joins list values embedded in text.
    pub list_separator: String,

    /// Drop graphs no longer reachable from the current one after navigation.
    pub release_unreachable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unresolved_policy: UnresolvedPolicy::Verbatim,
            list_separator: ", ".to_string(),
            release_unreachable: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("failed to parse {}: {e}", path.display())))
    }
}
