use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    Condition, FilesystemConfig, NetworkAccess, ObjectRef, ResourceSpec, SandboxSecurityContext,
    SecurityLevel, StorageConfig,
};

/* ============================= PHASE ============================= */

/// Lifecycle phase of a Sandbox, following the state machine in the
/// Sandbox Reconciler design: Pending → Creating → Running → Terminating.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SandboxPhase {
    #[default]
    Pending,
    Creating,
    Running,
    Terminating,
    Terminated,
    Failed,
}

/* ============================= SPEC ============================= */

/// Sandbox requests a single ephemeral execution environment.
///
/// Spec is user-owned and largely immutable after creation (only
/// annotations may be mutated); status is controller-owned.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "llmsafespace.dev",
    version = "v1",
    kind = "Sandbox",
    plural = "sandboxes",
    status = "SandboxStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSpec {
    /// Image reference, e.g. "python:3.10".
    pub runtime: String,

    #[serde(default)]
    pub security_level: SecurityLevel,

    /// Seconds, 1..3600.
    pub timeout: u32,

    #[serde(default)]
    pub resources: ResourceSpec,

    #[serde(default)]
    pub network_access: NetworkAccess,

    #[serde(default)]
    pub filesystem: FilesystemConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub security_context: SandboxSecurityContext,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_ref: Option<String>,

    /// When set, a fresh (non-warm-pod) sandbox gets its own dedicated
    /// Namespace instead of living in the Sandbox's own namespace — the
    /// first child object created, per the fixed creation order.
    #[serde(default)]
    pub namespace_isolation: bool,
}

/* ============================= STATUS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SandboxStatus {
    #[serde(default)]
    pub phase: SandboxPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// Reference to the WarmPod this sandbox was allocated from, if any.
    /// The bidirectional half of the §3 invariant lives on the WarmPod's
    /// `status.assigned_to`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm_pod_ref: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,
}

pub const SANDBOX_FINALIZER: &str = "llmsafespace.dev/sandbox-cleanup";
pub const SANDBOX_UID_LABEL: &str = "llmsafespace.dev/sandbox-uid";
pub const SANDBOX_ID_LABEL: &str = "llmsafespace.dev/sandbox-id";
