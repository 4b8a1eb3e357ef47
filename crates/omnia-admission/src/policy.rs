//! SessionPrivacyPolicy admission: the "child no less restrictive than
//! parent" hierarchy check, and protection of the last global policy.
//!
//! Parent resolution: a workspace-level policy parents on the global policy;
//! an agent-level policy parents on its workspace's policy, falling back to
//! global. A missing parent admits with a warning; the policy's controller
//! is expected to reflect `Error` in its status.

use omnia_core::{Object, PolicyLevel, SessionPrivacyPolicy};
use omnia_store::{
    AdmissionOperation, AdmissionRequest, AdmissionResponse, LabelSelector, RawObject, Store,
};

const RULE_HIERARCHY: &str = "privacy-policy/hierarchy";
const RULE_LAST_GLOBAL: &str = "privacy-policy/last-global";

async fn list_policies(store: &dyn Store) -> Result<Vec<SessionPrivacyPolicy>, AdmissionResponse> {
    let raw = store
        .list(SessionPrivacyPolicy::KIND, None, &LabelSelector::everything())
        .await
        .map_err(|err| {
            AdmissionResponse::deny(RULE_HIERARCHY, format!("parent lookup failed: {err}"))
        })?;
    let mut policies: Vec<SessionPrivacyPolicy> = raw
        .iter()
        .filter_map(|o| RawObject::to_typed(o).ok())
        .collect();
    policies.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    Ok(policies)
}

fn find_parent(
    policies: &[SessionPrivacyPolicy],
    child: &SessionPrivacyPolicy,
) -> Option<SessionPrivacyPolicy> {
    let global = || {
        policies
            .iter()
            .find(|p| p.spec.level == PolicyLevel::Global && p.metadata.uid != child.metadata.uid)
            .cloned()
    };
    match child.spec.level {
        PolicyLevel::Global => None,
        PolicyLevel::Workspace => global(),
        PolicyLevel::Agent => policies
            .iter()
            .find(|p| {
                p.spec.level == PolicyLevel::Workspace
                    && p.spec.workspace == child.spec.workspace
                    && p.metadata.uid != child.metadata.uid
            })
            .cloned()
            .or_else(global),
    }
}

/// All "stricter than parent" violations between `child` and `parent`.
pub fn hierarchy_violations(
    child: &SessionPrivacyPolicy,
    parent: &SessionPrivacyPolicy,
) -> Vec<String> {
    let mut violations = Vec::new();
    let c = &child.spec;
    let p = &parent.spec;

    if c.recording.enabled && !p.recording.enabled {
        violations.push("cannot enable recording when parent disables it".to_string());
    }
    if c.recording.rich_data && !p.recording.rich_data {
        violations.push("cannot enable rich-data capture when parent disables it".to_string());
    }
    if !c.redact_pii && p.redact_pii {
        violations.push("cannot disable PII redaction when parent requires it".to_string());
    }
    if !c.allow_user_opt_out && p.allow_user_opt_out {
        violations.push("cannot remove the user opt-out when parent allows it".to_string());
    }
    for (tier, child_days, parent_days) in [
        ("metadata", c.retention.metadata_days, p.retention.metadata_days),
        ("content", c.retention.content_days, p.retention.content_days),
        (
            "richData",
            c.retention.rich_data_days,
            p.retention.rich_data_days,
        ),
    ] {
        if child_days > parent_days {
            violations.push(format!(
                "retention.{tier} of {child_days}d exceeds the parent limit of {parent_days}d"
            ));
        }
    }
    violations
}

/// Review one SessionPrivacyPolicy intent.
pub async fn review(store: &dyn Store, request: &AdmissionRequest) -> AdmissionResponse {
    match request.operation {
        AdmissionOperation::Delete => review_delete(store, request).await,
        AdmissionOperation::Create | AdmissionOperation::Update => {
            review_write(store, request).await
        }
    }
}

async fn review_write(store: &dyn Store, request: &AdmissionRequest) -> AdmissionResponse {
    let Some(raw) = &request.object else {
        return AdmissionResponse::deny(RULE_HIERARCHY, "no object in review request");
    };
    let child: SessionPrivacyPolicy = match raw.to_typed() {
        Ok(policy) => policy,
        Err(err) => {
            return AdmissionResponse::deny(
                RULE_HIERARCHY,
                format!("object does not parse as a SessionPrivacyPolicy: {err}"),
            );
        }
    };
    if child.spec.level == PolicyLevel::Global {
        return AdmissionResponse::allow();
    }

    let policies = match list_policies(store).await {
        Ok(policies) => policies,
        Err(denial) => return denial,
    };
    let Some(parent) = find_parent(&policies, &child) else {
        return AdmissionResponse::allow_with_warnings(vec![format!(
            "no parent policy found for {}-level policy '{}'; its controller will report Error",
            child.spec.level, child.metadata.name
        )]);
    };

    let violations = hierarchy_violations(&child, &parent);
    if violations.is_empty() {
        AdmissionResponse::allow()
    } else {
        AdmissionResponse::deny(RULE_HIERARCHY, violations.join("; "))
    }
}

async fn review_delete(store: &dyn Store, request: &AdmissionRequest) -> AdmissionResponse {
    let Some(raw) = &request.old_object else {
        return AdmissionResponse::allow();
    };
    let Ok(policy) = raw.to_typed::<SessionPrivacyPolicy>() else {
        return AdmissionResponse::allow();
    };
    if policy.spec.level != PolicyLevel::Global {
        return AdmissionResponse::allow();
    }

    let policies = match list_policies(store).await {
        Ok(policies) => policies,
        Err(denial) => return denial,
    };
    let remaining_globals = policies
        .iter()
        .filter(|p| p.spec.level == PolicyLevel::Global && p.metadata.uid != policy.metadata.uid)
        .count();
    if remaining_globals == 0 {
        AdmissionResponse::deny(
            RULE_LAST_GLOBAL,
            "cannot delete the last global-level privacy policy",
        )
    } else {
        AdmissionResponse::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_core::{
        ObjectMeta, RecordingPolicy, RetentionPolicy, SessionPrivacyPolicySpec,
    };
    use omnia_store::MemoryStore;

    fn policy(
        name: &str,
        level: PolicyLevel,
        workspace: Option<&str>,
        mutate: impl FnOnce(&mut SessionPrivacyPolicySpec),
    ) -> SessionPrivacyPolicy {
        let mut spec = SessionPrivacyPolicySpec {
            level,
            workspace: workspace.map(str::to_string),
            ..SessionPrivacyPolicySpec::default()
        };
        mutate(&mut spec);
        SessionPrivacyPolicy {
            metadata: ObjectMeta::named("omnia-system", name),
            spec,
            status: None,
        }
    }

    async fn store_with(policies: &[SessionPrivacyPolicy]) -> MemoryStore {
        let store = MemoryStore::new();
        for policy in policies {
            store
                .create(RawObject::from_typed(policy).unwrap())
                .await
                .unwrap();
        }
        store
    }

    fn create_request(policy: &SessionPrivacyPolicy) -> AdmissionRequest {
        AdmissionRequest {
            operation: AdmissionOperation::Create,
            kind: SessionPrivacyPolicy::KIND.into(),
            object: Some(RawObject::from_typed(policy).unwrap()),
            old_object: None,
        }
    }

    #[tokio::test]
    async fn child_cannot_enable_recording_parent_disabled() {
        let global = policy("global", PolicyLevel::Global, None, |s| {
            s.recording.enabled = false;
        });
        let store = store_with(&[global]).await;

        let child = policy("acme", PolicyLevel::Workspace, Some("acme"), |s| {
            s.recording = RecordingPolicy {
                enabled: true,
                rich_data: false,
            };
        });
        let response = review(&store, &create_request(&child)).await;
        assert!(!response.allowed);
        let denial = response.denial.unwrap();
        assert_eq!(denial.rule, RULE_HIERARCHY);
        assert!(
            denial
                .message
                .contains("cannot enable recording when parent disables it")
        );
    }

    #[tokio::test]
    async fn stricter_child_is_admitted() {
        let global = policy("global", PolicyLevel::Global, None, |s| {
            s.recording = RecordingPolicy {
                enabled: true,
                rich_data: true,
            };
            s.redact_pii = false;
            s.retention = RetentionPolicy {
                metadata_days: 90,
                content_days: 90,
                rich_data_days: 90,
            };
        });
        let store = store_with(&[global]).await;

        let child = policy("acme", PolicyLevel::Workspace, Some("acme"), |s| {
            s.recording = RecordingPolicy {
                enabled: false,
                rich_data: false,
            };
            s.redact_pii = true;
            s.retention = RetentionPolicy {
                metadata_days: 30,
                content_days: 7,
                rich_data_days: 1,
            };
        });
        assert!(review(&store, &create_request(&child)).await.allowed);
    }

    #[tokio::test]
    async fn retention_cannot_exceed_parent() {
        let global = policy("global", PolicyLevel::Global, None, |s| {
            s.retention.content_days = 30;
        });
        let store = store_with(&[global]).await;

        let child = policy("acme", PolicyLevel::Workspace, Some("acme"), |s| {
            s.retention.content_days = 60;
        });
        let response = review(&store, &create_request(&child)).await;
        assert!(!response.allowed);
        assert!(response.denial.unwrap().message.contains("retention.content"));
    }

    #[tokio::test]
    async fn agent_level_prefers_workspace_parent() {
        let global = policy("global", PolicyLevel::Global, None, |s| {
            s.recording.enabled = true;
        });
        let workspace = policy("acme", PolicyLevel::Workspace, Some("acme"), |s| {
            s.recording.enabled = false;
        });
        let store = store_with(&[global, workspace]).await;

        // Recording enabled is fine against global but not against the
        // workspace parent.
        let agent = policy("acme-bot", PolicyLevel::Agent, Some("acme"), |s| {
            s.recording.enabled = true;
        });
        let response = review(&store, &create_request(&agent)).await;
        assert!(!response.allowed);
    }

    #[tokio::test]
    async fn agent_level_falls_back_to_global() {
        let global = policy("global", PolicyLevel::Global, None, |s| {
            s.recording.enabled = true;
        });
        let store = store_with(&[global]).await;

        let agent = policy("solo-bot", PolicyLevel::Agent, Some("unmanaged"), |s| {
            s.recording.enabled = true;
        });
        assert!(review(&store, &create_request(&agent)).await.allowed);
    }

    #[tokio::test]
    async fn missing_parent_admits_with_warning() {
        let store = store_with(&[]).await;
        let child = policy("acme", PolicyLevel::Workspace, Some("acme"), |_| {});
        let response = review(&store, &create_request(&child)).await;
        assert!(response.allowed);
        assert_eq!(response.warnings.len(), 1);
        assert!(response.warnings[0].contains("no parent policy"));
    }

    #[tokio::test]
    async fn last_global_policy_cannot_be_deleted() {
        let global = policy("global", PolicyLevel::Global, None, |_| {});
        let store = store_with(&[global]).await;
        let stored = store
            .get(SessionPrivacyPolicy::KIND, "omnia-system", "global")
            .await
            .unwrap()
            .unwrap();

        let request = AdmissionRequest {
            operation: AdmissionOperation::Delete,
            kind: SessionPrivacyPolicy::KIND.into(),
            object: None,
            old_object: Some(stored),
        };
        let response = review(&store, &request).await;
        assert!(!response.allowed);
        assert_eq!(response.denial.unwrap().rule, RULE_LAST_GLOBAL);
    }

    #[tokio::test]
    async fn global_delete_allowed_when_another_remains() {
        let a = policy("global-a", PolicyLevel::Global, None, |_| {});
        let b = policy("global-b", PolicyLevel::Global, None, |_| {});
        let store = store_with(&[a, b]).await;
        let stored = store
            .get(SessionPrivacyPolicy::KIND, "omnia-system", "global-a")
            .await
            .unwrap()
            .unwrap();

        let request = AdmissionRequest {
            operation: AdmissionOperation::Delete,
            kind: SessionPrivacyPolicy::KIND.into(),
            object: None,
            old_object: Some(stored),
        };
        assert!(review(&store, &request).await.allowed);
    }
}
