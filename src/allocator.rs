//! Warm Pod Allocator (§4.4): selects a pool, picks a ready pod, and
//! performs the atomic Ready→Assigned status patch that hands it to a
//! Sandbox. The atomicity comes from a `resourceVersion` precondition on
//! the patch, the same optimistic-concurrency pattern the teacher uses
//! for its policy status updates.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;

use crate::crd::common::{utc_now_rfc3339, ObjectRef};
use crate::crd::{WarmPod, WarmPodPhase, WarmPodStatus};
use crate::error::ReconcileError;

pub const FIELD_MANAGER: &str = "sandbox-controller";

/// Picks the first `Ready` pod from a pool's warm pods, oldest first, so
/// allocation drains the longest-idle pod (reduces recycle churn — Design
/// Notes "fairness of allocation").
pub fn pick_candidate(pods: &[WarmPod]) -> Option<&WarmPod> {
    pods.iter()
        .filter(|p| p.status.as_ref().map(WarmPodStatus::is_available).unwrap_or(false))
        .min_by_key(|p| {
            p.spec
                .creation_timestamp
                .as_deref()
                .and_then(crate::crd::common::parse_rfc3339)
        })
}

/// Attempts to atomically flip a candidate WarmPod from `Ready` to
/// `Assigned`. Uses the pod's captured `resourceVersion` as an optimistic
/// concurrency precondition: if another reconcile raced us to the same
/// pod, the patch fails with a 409 and the caller should retry with a
/// fresh candidate rather than re-patch the stale object.
pub async fn try_assign(
    client: Client,
    namespace: &str,
    candidate: &WarmPod,
    sandbox_ref: ObjectRef,
) -> Result<WarmPod, ReconcileError> {
    let api: Api<WarmPod> = Api::namespaced(client, namespace);
    let name = candidate.name_any();
    let resource_version = candidate.resource_version().ok_or_else(|| {
        ReconcileError::TransientInfra(format!("WarmPod '{name}' has no resourceVersion yet"))
    })?;

    let patch = json!({
        "apiVersion": "llmsafespace.dev/v1",
        "kind": "WarmPod",
        "metadata": { "name": name, "resourceVersion": resource_version },
        "status": {
            "phase": "assigned",
            "assignedTo": sandbox_ref,
            "assignedAt": utc_now_rfc3339(),
        }
    });

    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
        .await
        .map_err(ReconcileError::from)
}

/// Builds the owner reference a Sandbox places on the WarmPod it claimed,
/// transferring effective ownership without deleting and recreating the
/// pod (Design Notes "ownership transfer avoids split-brain").
pub fn sandbox_owner_reference(sandbox_name: &str, sandbox_uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "llmsafespace.dev/v1".to_string(),
        kind: "Sandbox".to_string(),
        name: sandbox_name.to_string(),
        uid: sandbox_uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
