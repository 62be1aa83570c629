use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::ObjectRef;

/* ============================= PHASE ============================= */

/// Lifecycle phase of a WarmPod, driven by `reconcile::warm_pod` and flipped
/// to `Assigned` only via the allocator's atomic status patch (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum WarmPodPhase {
    #[default]
    Pending,
    Ready,
    Assigned,
    Terminating,
}

/* ============================= SPEC ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "llmsafespace.dev",
    version = "v1",
    kind = "WarmPod",
    plural = "warmpods",
    status = "WarmPodStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WarmPodSpec {
    pub pool_ref: ObjectRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<String>,
}

/* ============================= STATUS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct WarmPodStatus {
    #[serde(default)]
    pub phase: WarmPodPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_namespace: Option<String>,

    /// Set only while phase == Assigned; cleared on recycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<String>,

    /// Bumped every successful recycle; gates the pool's
    /// `maxPodRecycleCount` eligibility check (§4.6 gate 4).
    #[serde(default)]
    pub recycle_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl WarmPodStatus {
    pub fn is_available(&self) -> bool {
        self.phase == WarmPodPhase::Ready
    }
}

pub const WARM_POD_FINALIZER: &str = "llmsafespace.dev/warmpod-cleanup";
pub const WARM_POD_POOL_LABEL: &str = "llmsafespace.dev/pool";
