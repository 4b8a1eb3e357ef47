//! ArenaJob admission: structural checks plus the license gate.
//!
//! Delete intents never error.

use crate::normalize_cron;
use omnia_core::{ArenaJob, ExecutionMode};
use omnia_license::License;
use omnia_store::{AdmissionOperation, AdmissionRequest, AdmissionResponse};
use std::str::FromStr;

const RULE_STRUCTURAL: &str = "arena-job/structural";
const RULE_LICENSE: &str = "arena-job/license";

/// Review one ArenaJob intent.
pub fn review(license: &License, request: &AdmissionRequest) -> AdmissionResponse {
    if request.operation == AdmissionOperation::Delete {
        return AdmissionResponse::allow();
    }
    let Some(raw) = &request.object else {
        return AdmissionResponse::deny(RULE_STRUCTURAL, "no object in review request");
    };
    let job: ArenaJob = match raw.to_typed() {
        Ok(job) => job,
        Err(err) => {
            return AdmissionResponse::deny(
                RULE_STRUCTURAL,
                format!("object does not parse as an ArenaJob: {err}"),
            );
        }
    };

    // Structural rules. The job type defaults to evaluation when empty.
    if job.spec.source_ref.is_empty() {
        return AdmissionResponse::deny(RULE_STRUCTURAL, "spec.sourceRef must be set");
    }
    if job.spec.arena_file.is_empty() {
        return AdmissionResponse::deny(RULE_STRUCTURAL, "spec.arenaFile must be set");
    }
    if job.spec.workers < 0 {
        return AdmissionResponse::deny(
            RULE_STRUCTURAL,
            format!("spec.workers must be >= 0, got {}", job.spec.workers),
        );
    }
    if let Some(schedule) = &job.spec.schedule {
        if cron::Schedule::from_str(&normalize_cron(&schedule.cron)).is_err() {
            return AdmissionResponse::deny(
                RULE_STRUCTURAL,
                format!("spec.schedule.cron '{}' is not a valid cron expression", schedule.cron),
            );
        }
    }
    if job.effective_execution_mode() == ExecutionMode::Fleet && job.spec.fleet.is_none() {
        return AdmissionResponse::deny(
            RULE_STRUCTURAL,
            "fleet execution mode requires spec.fleet.runtimeRef",
        );
    }

    // License gate.
    if let Err(violation) = license.validate_arena_job(
        job.spec.job_type,
        job.effective_workers(),
        job.spec.schedule.is_some(),
    ) {
        return AdmissionResponse::deny(RULE_LICENSE, violation.message.clone())
            .with_upgrade_hint(violation.upgrade_hint);
    }
    if job.effective_execution_mode() == ExecutionMode::Fleet {
        if let Err(violation) = license.validate_fleet_mode() {
            return AdmissionResponse::deny(RULE_LICENSE, violation.message.clone())
                .with_upgrade_hint(violation.upgrade_hint);
        }
    }

    AdmissionResponse::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_core::{ArenaJobSpec, ArenaJobType, FleetSpec, ObjectMeta, ScheduleSpec};
    use omnia_store::RawObject;

    fn request(operation: AdmissionOperation, spec: ArenaJobSpec) -> AdmissionRequest {
        let job = ArenaJob {
            metadata: ObjectMeta::named("prod", "j"),
            spec,
            status: None,
        };
        AdmissionRequest {
            operation,
            kind: "ArenaJob".into(),
            object: Some(RawObject::from_typed(&job).unwrap()),
            old_object: None,
        }
    }

    fn valid_spec() -> ArenaJobSpec {
        ArenaJobSpec {
            source_ref: "src".into(),
            arena_file: "suite.yaml".into(),
            ..ArenaJobSpec::default()
        }
    }

    #[test]
    fn plain_evaluation_is_admitted() {
        let response = review(
            &License::open_core(),
            &request(AdmissionOperation::Create, valid_spec()),
        );
        assert!(response.allowed);
    }

    #[test]
    fn missing_source_ref_is_structural() {
        let mut spec = valid_spec();
        spec.source_ref = String::new();
        let response = review(
            &License::open_core(),
            &request(AdmissionOperation::Create, spec),
        );
        assert!(!response.allowed);
        assert_eq!(response.denial.unwrap().rule, RULE_STRUCTURAL);
    }

    #[test]
    fn negative_workers_rejected() {
        let mut spec = valid_spec();
        spec.workers = -1;
        let response = review(
            &License::open_core(),
            &request(AdmissionOperation::Create, spec),
        );
        assert!(!response.allowed);
    }

    #[test]
    fn bad_cron_rejected_good_cron_validated() {
        let mut spec = valid_spec();
        spec.schedule = Some(ScheduleSpec {
            cron: "not a cron".into(),
        });
        let response = review(&License::dev(), &request(AdmissionOperation::Create, spec));
        assert!(!response.allowed);
        assert_eq!(response.denial.unwrap().rule, RULE_STRUCTURAL);

        let mut spec = valid_spec();
        spec.schedule = Some(ScheduleSpec {
            cron: "0 2 * * *".into(),
        });
        let response = review(&License::dev(), &request(AdmissionOperation::Create, spec));
        assert!(response.allowed);
    }

    #[test]
    fn scheduled_load_test_denied_on_open_core_with_hint() {
        let mut spec = valid_spec();
        spec.job_type = Some(ArenaJobType::LoadTest);
        spec.schedule = Some(ScheduleSpec {
            cron: "0 2 * * *".into(),
        });
        let response = review(
            &License::open_core(),
            &request(AdmissionOperation::Create, spec),
        );
        assert!(!response.allowed);
        let denial = response.denial.unwrap();
        assert_eq!(denial.rule, RULE_LICENSE);
        assert!(denial.upgrade_hint.is_some());
    }

    #[test]
    fn fleet_mode_requires_target_and_license() {
        let mut spec = valid_spec();
        spec.execution_mode = Some(ExecutionMode::Fleet);
        let response = review(&License::dev(), &request(AdmissionOperation::Create, spec));
        assert!(!response.allowed, "fleet without runtimeRef is structural");

        let mut spec = valid_spec();
        spec.execution_mode = Some(ExecutionMode::Fleet);
        spec.fleet = Some(FleetSpec {
            runtime_ref: "serving".into(),
        });
        let response = review(
            &License::open_core(),
            &request(AdmissionOperation::Create, spec.clone()),
        );
        assert!(!response.allowed, "fleet is not in open-core");

        let response = review(&License::dev(), &request(AdmissionOperation::Create, spec));
        assert!(response.allowed);
    }

    #[test]
    fn delete_never_errors() {
        let response = review(
            &License::open_core(),
            &AdmissionRequest {
                operation: AdmissionOperation::Delete,
                kind: "ArenaJob".into(),
                object: None,
                old_object: None,
            },
        );
        assert!(response.allowed);
    }
}
