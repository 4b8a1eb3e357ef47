//! Workspace storage: lazily ensure the shared read-only content volume
//! claim for a workspace exists before any worker pod referencing it is
//! scheduled.

use crate::workload::content_claim_name;
use omnia_core::{ObjectMeta, VolumeClaim, VolumeClaimSpec};
use omnia_store::{Api, StoreError};
use tracing::info;

const DEFAULT_CAPACITY: &str = "10Gi";

/// Ensure the workspace content claim exists in `namespace`. Idempotent;
/// returns the claim name.
pub async fn ensure_workspace_claim(
    claims: &Api<VolumeClaim>,
    namespace: &str,
    workspace: &str,
) -> Result<String, StoreError> {
    let name = content_claim_name(workspace);
    if claims.get(namespace, &name).await?.is_some() {
        return Ok(name);
    }
    let claim = VolumeClaim {
        metadata: ObjectMeta::named(namespace, name.clone()),
        spec: VolumeClaimSpec {
            capacity: Some(DEFAULT_CAPACITY.to_string()),
            read_only_many: true,
        },
    };
    match claims.create(&claim).await {
        Ok(_) => {
            info!(namespace, workspace, claim = %name, "created workspace content claim");
            Ok(name)
        }
        // Another reconcile won the race.
        Err(StoreError::AlreadyExists { .. }) => Ok(name),
        Err(err) => Err(err),
    }
}
