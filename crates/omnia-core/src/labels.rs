//! Well-known labels applied to child batch workloads.

use std::collections::BTreeMap;

/// Label key: logical application name.
pub const APP_NAME: &str = "app.kubernetes.io/name";
/// Label key: installation instance (the owning job's name).
pub const APP_INSTANCE: &str = "app.kubernetes.io/instance";
/// Label key: component within the application.
pub const APP_COMPONENT: &str = "app.kubernetes.io/component";
/// Label key: tool managing the record.
pub const APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Label key mapping a child workload back to its owning ArenaJob; the
/// child-to-parent watcher keys on this.
pub const JOB_LABEL: &str = "omnia.altairalabs.ai/job";

/// Label key carrying the workspace name on a namespace-grouping record.
pub const WORKSPACE_LABEL: &str = "omnia.altairalabs.ai/workspace";

/// Value of [`APP_NAME`] on worker workloads.
pub const WORKER_APP_NAME: &str = "arena-worker";
/// Value of [`APP_COMPONENT`] on worker workloads.
pub const WORKER_COMPONENT: &str = "worker";
/// Value of [`APP_MANAGED_BY`] on all records this operator manages.
pub const MANAGED_BY: &str = "omnia-operator";

/// The full label set stamped on a job's worker workload.
pub fn worker_labels(job_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_NAME.to_string(), WORKER_APP_NAME.to_string()),
        (APP_INSTANCE.to_string(), job_name.to_string()),
        (APP_COMPONENT.to_string(), WORKER_COMPONENT.to_string()),
        (APP_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (JOB_LABEL.to_string(), job_name.to_string()),
    ])
}
