//! omnia-arena
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Parses a fetched arena configuration, enumerates its scenarios, applies
//! include/exclude filters, and fans the surviving scenarios out into work
//! items (the Cartesian product with providers in direct mode, one item per
//! scenario in fleet mode).

/// Work-item fan-out.
pub mod items;
/// Scenario enumeration and filtering.
pub mod partition;

pub use items::build_work_items;
pub use partition::{Scenario, partition_scenarios};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Arena config
// ---------------------------------------------------------------------------

/// A parsed arena configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Scenarios in declared order.
    #[serde(default)]
    pub scenarios: Vec<ScenarioEntry>,
}

/// One scenario declaration: a stable id plus free-form metadata the worker
/// interprets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEntry {
    /// Stable scenario id.
    pub id: String,
    /// Everything else in the entry, passed through to workers.
    #[serde(flatten, default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Errors from parsing or partitioning arena configs.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// The config file could not be read.
    #[error("failed to read arena config {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML of the expected shape.
    #[error("failed to parse arena config {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A scenario include/exclude glob failed to compile.
    #[error("invalid scenario filter pattern '{pattern}': {source}")]
    Filter {
        /// The offending pattern.
        pattern: String,
        /// Underlying glob error.
        #[source]
        source: globset::Error,
    },
}

impl ArenaConfig {
    /// Parse an arena config from YAML text.
    pub fn from_yaml(path: &str, text: &str) -> Result<Self, ArenaError> {
        serde_yaml::from_str(text).map_err(|source| ArenaError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Load and parse an arena config file.
    pub fn load(path: &Path) -> Result<Self, ArenaError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ArenaError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml(&display, &text)
    }
}
