//! ArenaSource admission: backend-block consistency plus the source-type
//! license gate. Delete is a no-op.

use omnia_core::{ArenaSource, SourceType};
use omnia_license::License;
use omnia_store::{AdmissionOperation, AdmissionRequest, AdmissionResponse};

const RULE_STRUCTURAL: &str = "arena-source/structural";
const RULE_LICENSE: &str = "arena-source/license";

/// Review one ArenaSource intent.
pub fn review(license: &License, request: &AdmissionRequest) -> AdmissionResponse {
    if request.operation == AdmissionOperation::Delete {
        return AdmissionResponse::allow();
    }
    let Some(raw) = &request.object else {
        return AdmissionResponse::deny(RULE_STRUCTURAL, "no object in review request");
    };
    let source: ArenaSource = match raw.to_typed() {
        Ok(source) => source,
        Err(err) => {
            return AdmissionResponse::deny(
                RULE_STRUCTURAL,
                format!("object does not parse as an ArenaSource: {err}"),
            );
        }
    };

    let backend_present = match source.spec.source_type {
        SourceType::Git => source.spec.git.is_some(),
        SourceType::Oci => source.spec.oci.is_some(),
        SourceType::ConfigMap => source.spec.config_map.is_some(),
    };
    if !backend_present {
        return AdmissionResponse::deny(
            RULE_STRUCTURAL,
            format!(
                "spec.type is '{}' but the matching backend block is not configured",
                source.spec.source_type
            ),
        );
    }

    if let Err(violation) = license.validate_source_type(source.spec.source_type) {
        return AdmissionResponse::deny(RULE_LICENSE, violation.message.clone())
            .with_upgrade_hint(violation.upgrade_hint);
    }
    AdmissionResponse::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_core::{ArenaSourceSpec, GitSourceSpec, ObjectMeta, OciSourceSpec};
    use omnia_store::RawObject;

    fn request(spec: ArenaSourceSpec) -> AdmissionRequest {
        let source = ArenaSource {
            metadata: ObjectMeta::named("prod", "s"),
            spec,
            status: None,
        };
        AdmissionRequest {
            operation: AdmissionOperation::Create,
            kind: "ArenaSource".into(),
            object: Some(RawObject::from_typed(&source).unwrap()),
            old_object: None,
        }
    }

    #[test]
    fn backend_block_must_match_type() {
        let spec = ArenaSourceSpec {
            source_type: SourceType::Git,
            git: None,
            ..ArenaSourceSpec::default()
        };
        let response = review(&License::dev(), &request(spec));
        assert!(!response.allowed);
        assert_eq!(response.denial.unwrap().rule, RULE_STRUCTURAL);

        let spec = ArenaSourceSpec {
            source_type: SourceType::Git,
            git: Some(GitSourceSpec {
                url: "https://example.com/arenas.git".into(),
                ..GitSourceSpec::default()
            }),
            ..ArenaSourceSpec::default()
        };
        assert!(review(&License::dev(), &request(spec)).allowed);
    }

    #[test]
    fn oci_sources_need_a_license() {
        let spec = ArenaSourceSpec {
            source_type: SourceType::Oci,
            oci: Some(OciSourceSpec {
                image: "oci://registry.example.com/arenas:v1".into(),
                auth: None,
            }),
            ..ArenaSourceSpec::default()
        };
        let response = review(&License::open_core(), &request(spec.clone()));
        assert!(!response.allowed);
        assert_eq!(response.denial.unwrap().rule, RULE_LICENSE);

        assert!(review(&License::dev(), &request(spec)).allowed);
    }

    #[test]
    fn delete_is_a_no_op() {
        let response = review(
            &License::open_core(),
            &AdmissionRequest {
                operation: AdmissionOperation::Delete,
                kind: "ArenaSource".into(),
                object: None,
                old_object: None,
            },
        );
        assert!(response.allowed);
    }
}
