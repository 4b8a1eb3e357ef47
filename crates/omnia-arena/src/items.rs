//! Work-item fan-out: scenarios × providers in direct mode, one item per
//! scenario in fleet mode, with documented fallbacks when either dimension
//! is empty.

use crate::partition::Scenario;
use chrono::Utc;
use omnia_core::ExecutionMode;
use omnia_queue::{DEFAULT_MAX_ATTEMPTS, WorkItem, WorkItemStatus};
use tracing::debug;

/// Scenario id stamped on fallback items when enumeration produced nothing.
pub const FALLBACK_SCENARIO_ID: &str = "default";

fn new_item(
    job_id: &str,
    id: String,
    scenario_id: &str,
    provider_id: Option<&str>,
    bundle_url: &str,
) -> WorkItem {
    WorkItem {
        id,
        job_id: job_id.to_string(),
        scenario_id: scenario_id.to_string(),
        provider_id: provider_id.map(str::to_string),
        bundle_url: bundle_url.to_string(),
        attempt: 1,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
        status: WorkItemStatus::Pending,
        created_at: Utc::now(),
    }
}

/// Fan a job out into work items.
///
/// `job_id` keys the queue partition; `job_name` seeds the stable item ids.
/// Direct mode emits the scenario × provider matrix with stable ids
/// `{job}-{provider}-{index}`; with no scenarios it falls back to one item
/// per provider, and with no providers to a single `default` item. Fleet
/// mode emits one item per scenario (`{job}-{scenario}-{index}`), with the
/// provider dimension omitted.
pub fn build_work_items(
    job_id: &str,
    job_name: &str,
    mode: ExecutionMode,
    scenarios: &[Scenario],
    provider_ids: &[String],
    bundle_url: &str,
) -> Vec<WorkItem> {
    let items = match mode {
        ExecutionMode::Fleet => {
            if scenarios.is_empty() {
                vec![new_item(
                    job_id,
                    format!("{job_name}-{FALLBACK_SCENARIO_ID}-0"),
                    FALLBACK_SCENARIO_ID,
                    None,
                    bundle_url,
                )]
            } else {
                scenarios
                    .iter()
                    .enumerate()
                    .map(|(index, scenario)| {
                        new_item(
                            job_id,
                            format!("{job_name}-{}-{index}", scenario.id),
                            &scenario.id,
                            None,
                            bundle_url,
                        )
                    })
                    .collect()
            }
        }
        ExecutionMode::Direct => {
            if !scenarios.is_empty() && !provider_ids.is_empty() {
                let mut items = Vec::with_capacity(scenarios.len() * provider_ids.len());
                let mut index = 0;
                for scenario in scenarios {
                    for provider in provider_ids {
                        items.push(new_item(
                            job_id,
                            format!("{job_name}-{provider}-{index}"),
                            &scenario.id,
                            Some(provider),
                            bundle_url,
                        ));
                        index += 1;
                    }
                }
                items
            } else if !provider_ids.is_empty() {
                provider_ids
                    .iter()
                    .enumerate()
                    .map(|(index, provider)| {
                        new_item(
                            job_id,
                            format!("{job_name}-{provider}-{index}"),
                            FALLBACK_SCENARIO_ID,
                            Some(provider),
                            bundle_url,
                        )
                    })
                    .collect()
            } else {
                vec![new_item(
                    job_id,
                    format!("{job_name}-{FALLBACK_SCENARIO_ID}-0"),
                    FALLBACK_SCENARIO_ID,
                    None,
                    bundle_url,
                )]
            }
        }
    };
    debug!(
        job = job_name,
        mode = %mode,
        scenarios = scenarios.len(),
        providers = provider_ids.len(),
        items = items.len(),
        "built work items"
    );
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;

    fn scenarios(ids: &[&str]) -> Vec<Scenario> {
        ids.iter()
            .map(|id| Scenario {
                id: id.to_string(),
                metadata: BTreeMap::new(),
            })
            .collect()
    }

    fn providers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn direct_matrix_covers_every_pair() {
        let items = build_work_items(
            "prod/j",
            "j",
            ExecutionMode::Direct,
            &scenarios(&["s1", "s2", "s3"]),
            &providers(&["openai-a", "openai-b"]),
            "bundle",
        );
        assert_eq!(items.len(), 6);

        let pairs: BTreeSet<(String, String)> = items
            .iter()
            .map(|i| (i.scenario_id.clone(), i.provider_id.clone().unwrap()))
            .collect();
        assert_eq!(pairs.len(), 6);
        assert!(pairs.contains(&("s1".into(), "openai-a".into())));
        assert!(pairs.contains(&("s3".into(), "openai-b".into())));

        // Ids are stable: `{job}-{provider}-{index}` with a global index.
        assert_eq!(items[0].id, "j-openai-a-0");
        assert_eq!(items[1].id, "j-openai-b-1");
        assert_eq!(items[5].id, "j-openai-b-5");
    }

    #[test]
    fn direct_matrix_is_deterministic() {
        let s = scenarios(&["s1", "s2"]);
        let p = providers(&["a", "b"]);
        let first = build_work_items("prod/j", "j", ExecutionMode::Direct, &s, &p, "bundle");
        let second = build_work_items("prod/j", "j", ExecutionMode::Direct, &s, &p, "bundle");
        let ids: Vec<&str> = first.iter().map(|i| i.id.as_str()).collect();
        let ids2: Vec<&str> = second.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ids2);
    }

    #[test]
    fn empty_scenarios_fall_back_to_per_provider_items() {
        let items = build_work_items(
            "prod/j",
            "j",
            ExecutionMode::Direct,
            &[],
            &providers(&["a", "b"]),
            "bundle",
        );
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.scenario_id == "default"));
        assert_eq!(items[0].id, "j-a-0");
        assert_eq!(items[1].id, "j-b-1");
    }

    #[test]
    fn no_providers_fall_back_to_single_default_item() {
        let items = build_work_items(
            "prod/j",
            "j",
            ExecutionMode::Direct,
            &scenarios(&["s1"]),
            &[],
            "bundle",
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "j-default-0");
        assert_eq!(items[0].scenario_id, "default");
        assert!(items[0].provider_id.is_none());
    }

    #[test]
    fn fleet_mode_omits_provider_dimension() {
        let items = build_work_items(
            "prod/j",
            "j",
            ExecutionMode::Fleet,
            &scenarios(&["s1", "s2"]),
            &providers(&["ignored"]),
            "bundle",
        );
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.provider_id.is_none()));
        assert_eq!(items[0].id, "j-s1-0");
        assert_eq!(items[1].id, "j-s2-1");
    }

    #[test]
    fn items_start_pending_with_retry_budget() {
        let items = build_work_items(
            "prod/j",
            "j",
            ExecutionMode::Direct,
            &scenarios(&["s1"]),
            &providers(&["p"]),
            "bundle",
        );
        let item = &items[0];
        assert_eq!(item.status, WorkItemStatus::Pending);
        assert_eq!(item.attempt, 1);
        assert_eq!(item.max_attempts, 3);
        assert_eq!(item.bundle_url, "bundle");
        assert_eq!(item.job_id, "prod/j");
    }
}
