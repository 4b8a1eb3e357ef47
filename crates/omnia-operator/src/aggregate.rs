//! Result aggregation: fold a job's terminal results stream into the
//! summary published on its status.
//!
//! Pure over its input, so running it twice on the same terminal stream
//! yields the same summary. In fleet mode results carry no provider id and
//! the per-scenario map is the only breakdown.

use omnia_core::{ResultSummary, ScenarioResult};
use omnia_queue::{WorkItemResult, WorkItemStatus};

/// Fold terminal results into a summary.
pub fn summarize(results: &[WorkItemResult]) -> ResultSummary {
    let mut summary = ResultSummary::default();
    for result in results {
        if !result.status.is_terminal() {
            continue;
        }
        summary.total_items += 1;
        let scenario = summary
            .per_scenario
            .entry(result.scenario_id.clone())
            .or_insert(ScenarioResult::default());
        match result.status {
            WorkItemStatus::Done => {
                summary.passed_items += 1;
                scenario.passed += 1;
            }
            WorkItemStatus::Failed => {
                summary.failed_items += 1;
                scenario.failed += 1;
            }
            WorkItemStatus::Pending | WorkItemStatus::Leased => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(scenario: &str, provider: Option<&str>, status: WorkItemStatus) -> WorkItemResult {
        WorkItemResult {
            item_id: format!("j-{scenario}-{}", provider.unwrap_or("fleet")),
            scenario_id: scenario.to_string(),
            provider_id: provider.map(str::to_string),
            status,
            passed: None,
            failed: None,
            payload: None,
        }
    }

    #[test]
    fn counts_per_item_and_per_scenario() {
        let results = vec![
            result("s1", Some("a"), WorkItemStatus::Done),
            result("s1", Some("b"), WorkItemStatus::Failed),
            result("s2", Some("a"), WorkItemStatus::Done),
            result("s2", Some("b"), WorkItemStatus::Done),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.total_items, 4);
        assert_eq!(summary.passed_items, 3);
        assert_eq!(summary.failed_items, 1);
        assert_eq!(summary.per_scenario["s1"].passed, 1);
        assert_eq!(summary.per_scenario["s1"].failed, 1);
        assert_eq!(summary.per_scenario["s2"].passed, 2);
        assert_eq!(summary.per_scenario["s2"].failed, 0);
    }

    #[test]
    fn summarize_is_idempotent() {
        let results = vec![
            result("s1", Some("a"), WorkItemStatus::Done),
            result("s2", Some("a"), WorkItemStatus::Failed),
        ];
        assert_eq!(summarize(&results), summarize(&results));
    }

    #[test]
    fn non_terminal_records_are_ignored() {
        let results = vec![
            result("s1", Some("a"), WorkItemStatus::Done),
            result("s2", Some("a"), WorkItemStatus::Leased),
            result("s3", Some("a"), WorkItemStatus::Pending),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.total_items, 1);
        assert!(!summary.per_scenario.contains_key("s2"));
    }

    #[test]
    fn empty_stream_is_an_empty_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary, ResultSummary::default());
    }

    #[test]
    fn fleet_results_aggregate_by_scenario_only() {
        let results = vec![
            result("s1", None, WorkItemStatus::Done),
            result("s2", None, WorkItemStatus::Failed),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.per_scenario.len(), 2);
    }
}
