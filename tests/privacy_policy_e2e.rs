//! Privacy-policy hierarchy enforcement through the store's admission hook.

use omnia_admission::OmniaAdmission;
use omnia_core::{
    ObjectMeta, PolicyLevel, SessionPrivacyPolicy, SessionPrivacyPolicySpec,
};
use omnia_license::License;
use omnia_store::{Api, MemoryStore, StoreError};
use std::sync::Arc;

fn policy(
    name: &str,
    level: PolicyLevel,
    workspace: Option<&str>,
    recording_enabled: bool,
) -> SessionPrivacyPolicy {
    SessionPrivacyPolicy {
        metadata: ObjectMeta::named("omnia-system", name),
        spec: SessionPrivacyPolicySpec {
            level,
            workspace: workspace.map(str::to_string),
            recording: omnia_core::RecordingPolicy {
                enabled: recording_enabled,
                rich_data: false,
            },
            ..SessionPrivacyPolicySpec::default()
        },
        status: None,
    }
}

fn admission_store() -> (Arc<MemoryStore>, Api<SessionPrivacyPolicy>) {
    let store = Arc::new(MemoryStore::new());
    store.set_admission(Arc::new(OmniaAdmission::new(License::dev())));
    let api = Api::new(store.clone());
    (store, api)
}

#[tokio::test]
async fn child_cannot_relax_recording() {
    let (_store, api) = admission_store();
    api.create(&policy("global", PolicyLevel::Global, None, false))
        .await
        .unwrap();

    let err = api
        .create(&policy("acme", PolicyLevel::Workspace, Some("acme"), true))
        .await
        .unwrap_err();
    match err {
        StoreError::AdmissionDenied { message, .. } => {
            assert!(message.contains("cannot enable recording when parent disables it"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn stricter_child_is_accepted() {
    let (_store, api) = admission_store();
    api.create(&policy("global", PolicyLevel::Global, None, true))
        .await
        .unwrap();
    api.create(&policy("acme", PolicyLevel::Workspace, Some("acme"), false))
        .await
        .unwrap();
}

#[tokio::test]
async fn last_global_policy_cannot_be_deleted() {
    let (_store, api) = admission_store();
    api.create(&policy("global", PolicyLevel::Global, None, true))
        .await
        .unwrap();

    let err = api.delete("omnia-system", "global").await.unwrap_err();
    match err {
        StoreError::AdmissionDenied { rule, .. } => {
            assert_eq!(rule, "privacy-policy/last-global");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // With a second global policy present, deletion goes through.
    api.create(&policy("global-b", PolicyLevel::Global, None, true))
        .await
        .unwrap();
    api.delete("omnia-system", "global").await.unwrap();
}
