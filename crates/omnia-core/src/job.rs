//! ArenaJob: a user-declared batch evaluation or load-test job.

use crate::condition::Condition;
use crate::{ObjectMeta, impl_object};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A batch evaluation / load-test job driven by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct ArenaJob {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: ArenaJobSpec,
    /// Observed state, written only by the reconciler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ArenaJobStatus>,
}

impl_object!(ArenaJob, "ArenaJob");

impl ArenaJob {
    /// Deterministic name of the child batch workload.
    pub fn worker_workload_name(&self) -> String {
        format!("{}-worker", self.metadata.name)
    }

    /// Job type with the documented default applied.
    pub fn effective_job_type(&self) -> ArenaJobType {
        self.spec.job_type.unwrap_or(ArenaJobType::Evaluation)
    }

    /// Worker count with the documented floor applied (0 is treated as 1).
    pub fn effective_workers(&self) -> i32 {
        self.spec.workers.max(1)
    }

    /// Execution mode with the documented default applied.
    pub fn effective_execution_mode(&self) -> ExecutionMode {
        self.spec.execution_mode.unwrap_or(ExecutionMode::Direct)
    }

    /// Returns the current phase, if status has been written.
    pub fn phase(&self) -> Option<JobPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Returns `true` once the job has reached a sticky terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase(),
            Some(JobPhase::Succeeded | JobPhase::Failed | JobPhase::Cancelled)
        )
    }
}

/// Job flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ArenaJobType {
    /// Scenario evaluation run.
    #[serde(rename = "evaluation")]
    Evaluation,
    /// Load / stress test run.
    #[serde(rename = "load-test")]
    LoadTest,
}

impl fmt::Display for ArenaJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evaluation => f.write_str("evaluation"),
            Self::LoadTest => f.write_str("load-test"),
        }
    }
}

/// How work items are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Workers call providers directly; items span scenarios × providers.
    Direct,
    /// Workers drive a pre-deployed agent runtime; items span scenarios only.
    Fleet,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Fleet => f.write_str("fleet"),
        }
    }
}

/// Desired state of an [`ArenaJob`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArenaJobSpec {
    /// Job flavour; defaults to `evaluation` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<ArenaJobType>,

    /// Name of the ArenaSource providing the arena config bundle.
    pub source_ref: String,

    /// Path of the arena configuration file inside the source content.
    pub arena_file: String,

    /// Desired worker replica count; 0 is treated as 1.
    #[serde(default)]
    pub workers: i32,

    /// Optional recurrence schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,

    /// Verbose worker logging.
    #[serde(default)]
    pub verbose: bool,

    /// Seconds after finish before the child workload is garbage-collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i64>,

    /// Provider-override selectors, grouped by name (e.g. `default`, `judge`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_overrides: Vec<ProviderOverrideSelector>,

    /// Tool-registry override selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_registry_override: Option<ToolRegistrySelector>,

    /// Scenario include/exclude filters (globs on scenario id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenarios: Option<ScenarioFilter>,

    /// Execution mode; defaults to `direct`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,

    /// Fleet-mode target; required when `execution_mode` is `fleet`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet: Option<FleetSpec>,
}

/// Cron-style recurrence.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ScheduleSpec {
    /// Standard five-field cron expression.
    pub cron: String,
}

/// Selects providers for one override group.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOverrideSelector {
    /// Group name the matched providers are published under.
    #[serde(default = "ProviderOverrideSelector::default_group")]
    pub group: String,
    /// Glob over provider names (e.g. `openai-*`).
    pub selector: String,
    /// Optional equality label match, ANDed with the name glob.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

impl ProviderOverrideSelector {
    fn default_group() -> String {
        "default".to_string()
    }
}

/// Selects the tool registries whose tools are flattened into the override
/// config.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolRegistrySelector {
    /// Registry name; mutually exclusive with `match_labels`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Equality label match over registries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// Include/exclude globs over scenario ids.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub struct ScenarioFilter {
    /// When non-empty, only matching scenario ids survive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Matching scenario ids are removed after includes are applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// Fleet-mode target reference.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FleetSpec {
    /// Name of the AgentRuntime serving the fleet.
    pub runtime_ref: String,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle phase of an [`ArenaJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum JobPhase {
    /// Accepted, prerequisites not yet satisfied.
    Pending,
    /// Worker workload created; items executing.
    Running,
    /// Every work item passed.
    Succeeded,
    /// License, source, infrastructure, or test failure.
    Failed,
    /// Entered only via user deletion.
    Cancelled,
}

impl JobPhase {
    /// Terminal phases are sticky: the reconciler never leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Work-item progress counters.
///
/// Invariant: `total == completed + failed + pending`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct JobProgress {
    /// Items emitted for this job.
    pub total: u32,
    /// Items with a terminal passing result.
    pub completed: u32,
    /// Items with a terminal failing result.
    pub failed: u32,
    /// Items not yet terminal.
    pub pending: u32,
}

impl JobProgress {
    /// Returns `true` when the counters satisfy the accounting invariant.
    pub fn is_consistent(&self) -> bool {
        self.total == self.completed + self.failed + self.pending
    }
}

/// Aggregated results published by the result aggregator.
///
/// In fleet mode work items carry no provider dimension, so `per_scenario`
/// is the only breakdown; no per-provider map is published.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    /// Terminal items observed.
    pub total_items: u32,
    /// Items that passed.
    pub passed_items: u32,
    /// Items that failed.
    pub failed_items: u32,
    /// Pass/fail counts keyed by scenario id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_scenario: BTreeMap<String, ScenarioResult>,
}

/// Pass/fail counts for one scenario.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ScenarioResult {
    /// Passing items.
    pub passed: u32,
    /// Failing items.
    pub failed: u32,
}

/// Observed state of an [`ArenaJob`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArenaJobStatus {
    /// Current phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<JobPhase>,

    /// Workers currently active in the child workload.
    #[serde(default)]
    pub active_workers: i32,

    /// Work-item counters.
    #[serde(default)]
    pub progress: JobProgress,

    /// When the child workload was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the child workload completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Durable error surface, upserted by type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Aggregated results, present once the aggregator has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<ResultSummary>,

    /// Spec generation this status was written against.
    #[serde(default)]
    pub observed_generation: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(spec: ArenaJobSpec) -> ArenaJob {
        ArenaJob {
            metadata: ObjectMeta::named("prod", "smoke"),
            spec,
            status: None,
        }
    }

    #[test]
    fn defaults_applied() {
        let j = job(ArenaJobSpec::default());
        assert_eq!(j.effective_job_type(), ArenaJobType::Evaluation);
        assert_eq!(j.effective_workers(), 1);
        assert_eq!(j.effective_execution_mode(), ExecutionMode::Direct);
        assert_eq!(j.worker_workload_name(), "smoke-worker");
    }

    #[test]
    fn zero_workers_floored_to_one() {
        let j = job(ArenaJobSpec {
            workers: 0,
            ..ArenaJobSpec::default()
        });
        assert_eq!(j.effective_workers(), 1);

        let j = job(ArenaJobSpec {
            workers: 3,
            ..ArenaJobSpec::default()
        });
        assert_eq!(j.effective_workers(), 3);
    }

    #[test]
    fn job_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&ArenaJobType::LoadTest).unwrap(),
            r#""load-test""#
        );
        assert_eq!(
            serde_json::to_string(&ArenaJobType::Evaluation).unwrap(),
            r#""evaluation""#
        );
    }

    #[test]
    fn terminal_phases() {
        assert!(JobPhase::Succeeded.is_terminal());
        assert!(JobPhase::Failed.is_terminal());
        assert!(JobPhase::Cancelled.is_terminal());
        assert!(!JobPhase::Pending.is_terminal());
        assert!(!JobPhase::Running.is_terminal());
    }

    #[test]
    fn progress_invariant() {
        let p = JobProgress {
            total: 6,
            completed: 4,
            failed: 1,
            pending: 1,
        };
        assert!(p.is_consistent());

        let broken = JobProgress {
            total: 6,
            completed: 4,
            failed: 1,
            pending: 0,
        };
        assert!(!broken.is_consistent());
    }

    #[test]
    fn spec_yaml_roundtrip() {
        let yaml = r#"
sourceRef: arena-configs
arenaFile: suites/chat.yaml
workers: 2
providerOverrides:
  - group: default
    selector: "openai-*"
scenarios:
  include: ["chat-*"]
"#;
        let spec: ArenaJobSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.source_ref, "arena-configs");
        assert_eq!(spec.workers, 2);
        assert_eq!(spec.provider_overrides.len(), 1);
        assert_eq!(spec.provider_overrides[0].group, "default");
        assert_eq!(spec.provider_overrides[0].selector, "openai-*");
        assert_eq!(spec.scenarios.unwrap().include, vec!["chat-*"]);
    }

    #[test]
    fn selector_group_defaults_to_default() {
        let sel: ProviderOverrideSelector =
            serde_yaml::from_str(r#"selector: "anthropic-*""#).unwrap();
        assert_eq!(sel.group, "default");
    }
}
