use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, PreloadScript, ResourceSpec, SecurityLevel};

/* ============================= AUTOSCALING ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// 1..100.
    #[serde(default = "default_target_utilization")]
    pub target_utilization: u32,

    #[serde(default = "default_scale_down_delay")]
    pub scale_down_delay: u64,
}

fn default_target_utilization() -> u32 {
    80
}

fn default_scale_down_delay() -> u64 {
    300
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_utilization: default_target_utilization(),
            scale_down_delay: default_scale_down_delay(),
        }
    }
}

/* ============================= RECYCLING POLICY ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecyclingPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds. Default 24h.
    #[serde(default = "default_max_pod_age")]
    pub max_pod_age: u64,

    #[serde(default = "default_max_recycle_count")]
    pub max_pod_recycle_count: u32,

    /// Minimum seconds a pod must have run before it's eligible to recycle.
    #[serde(default)]
    pub min_pod_runtime_before_recycle: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_script: Option<String>,

    /// Whether a probe transport error counts as ineligible ("no") rather
    /// than being ignored — Design Notes default to fail-open.
    #[serde(default)]
    pub fail_closed: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_pod_age() -> u64 {
    24 * 60 * 60
}

fn default_max_recycle_count() -> u32 {
    50
}

impl Default for RecyclingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pod_age: default_max_pod_age(),
            max_pod_recycle_count: default_max_recycle_count(),
            min_pod_runtime_before_recycle: 0,
            cleanup_script: None,
            verification_script: None,
            fail_closed: false,
        }
    }
}

/* ============================= SPEC ============================= */

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "llmsafespace.dev",
    version = "v1",
    kind = "WarmPool",
    plural = "warmpools",
    status = "WarmPoolStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WarmPoolSpec {
    pub runtime: String,

    pub min_size: u32,

    /// 0 = unlimited.
    #[serde(default)]
    pub max_size: u32,

    #[serde(default)]
    pub security_level: SecurityLevel,

    /// Idle expiry seconds, 0 = none.
    #[serde(default)]
    pub ttl: u64,

    #[serde(default)]
    pub resources: ResourceSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preload_packages: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preload_scripts: Vec<PreloadScript>,

    #[serde(default)]
    pub auto_scaling: AutoScalingConfig,

    #[serde(default)]
    pub recycling: RecyclingPolicy,
}

/* ============================= STATUS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct WarmPoolStatus {
    #[serde(default)]
    pub available_pods: u32,

    #[serde(default)]
    pub assigned_pods: u32,

    #[serde(default)]
    pub pending_pods: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl WarmPoolStatus {
    /// Utilization as defined in §4.3 step 3: assigned/(available+assigned+pending).
    pub fn utilization(&self) -> f64 {
        let total = self.available_pods + self.assigned_pods + self.pending_pods;
        if total == 0 {
            0.0
        } else {
            self.assigned_pods as f64 / total as f64
        }
    }
}

pub const WARM_POOL_FINALIZER: &str = "llmsafespace.dev/warmpool-cleanup";
pub const WARM_POOL_SELECTOR_LABEL: &str = "llmsafespace.dev/pool";
pub const WARM_POOL_RUNTIME_LABEL: &str = "llmsafespace.dev/runtime";
