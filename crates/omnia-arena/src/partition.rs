//! Scenario enumeration and include/exclude filtering.
//!
//! Pure given `(config, filter)`: declared order is kept, duplicate ids are
//! dropped (first wins), includes are applied before excludes. An empty
//! result is valid input to the work-item builder, which falls back to
//! per-provider items.

use crate::{ArenaConfig, ArenaError};
use globset::{Glob, GlobSet, GlobSetBuilder};
use omnia_core::ScenarioFilter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One partitioned scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    /// Stable scenario id.
    pub id: String,
    /// Free-form metadata passed through to workers.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn compile_globs(patterns: &[String]) -> Result<Option<GlobSet>, ArenaError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ArenaError::Filter {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|source| ArenaError::Filter {
        pattern: patterns.join(","),
        source,
    })?;
    Ok(Some(set))
}

/// Enumerate a config's scenarios and apply the job's filters.
pub fn partition_scenarios(
    config: &ArenaConfig,
    filter: Option<&ScenarioFilter>,
) -> Result<Vec<Scenario>, ArenaError> {
    let empty = ScenarioFilter::default();
    let filter = filter.unwrap_or(&empty);
    let include = compile_globs(&filter.include)?;
    let exclude = compile_globs(&filter.exclude)?;

    let mut seen = BTreeSet::new();
    let mut scenarios = Vec::new();
    for entry in &config.scenarios {
        // First declaration wins.
        if !seen.insert(entry.id.clone()) {
            continue;
        }
        if include.as_ref().is_some_and(|set| !set.is_match(&entry.id)) {
            continue;
        }
        if exclude.as_ref().is_some_and(|set| set.is_match(&entry.id)) {
            continue;
        }
        scenarios.push(Scenario {
            id: entry.id.clone(),
            metadata: entry.metadata.clone(),
        });
    }
    Ok(scenarios)
}
