//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Tunables shared by the expander and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Upper bound on occurrences one expansion may produce per entry.
    /// Windows holding more are rejected rather than truncated.
    pub max_occurrences: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_occurrences: 50_000,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON document. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Validation(format!("invalid engine config: {}", e)))
    }
}
