use k8s_openapi::chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= CONDITIONS ============================= */

/// Status of a single condition, mirroring the Kubernetes `metav1.Condition`
/// convention used for `status.conditions[]` across all five resource kinds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observed condition on a resource's status.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(kind: &str, status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: kind.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Utc::now().to_rfc3339(),
        }
    }
}

/// Upserts a condition by type, only bumping `lastTransitionTime` when the
/// status actually changes (the controller must not churn transition times
/// on every reconcile — §3 invariant discipline for status subresources).
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        if existing.status != new.status {
            existing.status = new.status;
            existing.last_transition_time = new.last_transition_time;
        }
        existing.reason = new.reason;
        existing.message = new.message;
    } else {
        conditions.push(new);
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], kind: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == kind)
}

/* ============================= SECURITY LEVEL ============================= */

/// Security posture requested for a Sandbox or WarmPool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SecurityLevel {
    #[default]
    Standard,
    High,
    Custom,
}

/* ============================= RESOURCE REQUIREMENTS ============================= */

/// CPU/memory/storage requirements requested for a sandbox pod.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_storage: Option<String>,

    /// Pin the sandbox to specific CPU cores (e.g. "0-3").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_pinning: Option<String>,
}

/* ============================= NETWORK ============================= */

/// A single egress allowance: a domain plus optional port/protocol scoping.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    pub domain: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Network access policy requested for a Sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAccess {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<EgressRule>,

    #[serde(default)]
    pub ingress: bool,
}

/* ============================= FILESYSTEM ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemConfig {
    #[serde(default)]
    pub read_only_root: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writable_paths: Vec<String>,
}

/* ============================= STORAGE ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub persistent: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_volumes: Vec<String>,
}

/* ============================= SECURITY CONTEXT ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,
}

/* ============================= OBJECT REF ============================= */

/// A reference to a named (optionally namespaced) object, carried as plain
/// data rather than an in-memory pointer — see Design Notes "Owner graphs".
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/* ============================= PRELOAD SCRIPT ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PreloadScript {
    pub name: String,
    pub content: String,
}

/// Annotation a released Sandbox carries when it observed something that
/// makes its backing WarmPod unsafe to recycle (e.g. a seccomp violation).
/// Read by the Sandbox Reconciler's deletion path and fed into
/// `recycle::decide` as an unconditional destroy gate.
pub const SECURITY_EVENT_ANNOTATION: &str = "llmsafespace.dev/security-event";

/// Normalizes a runtime image reference into the `{runtime: <normalized>}`
/// label value used to select WarmPools (§4.4 step 1).
pub fn normalize_runtime_label(runtime: &str) -> String {
    runtime
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

pub fn utc_now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_inserts_new() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::new("Ready", ConditionStatus::True, "AllGood", "ok"));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].r#type, "Ready");
    }

    #[test]
    fn test_set_condition_updates_existing_without_duplicating() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::new("Ready", ConditionStatus::False, "NotYet", "waiting"));
        set_condition(&mut conditions, Condition::new("Ready", ConditionStatus::True, "Done", "ready now"));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert_eq!(conditions[0].reason, "Done");
    }

    #[test]
    fn test_set_condition_preserves_transition_time_when_status_unchanged() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::new("Ready", ConditionStatus::True, "Done", "ready"));
        let first_time = conditions[0].last_transition_time.clone();
        set_condition(&mut conditions, Condition::new("Ready", ConditionStatus::True, "StillDone", "still ready"));
        assert_eq!(conditions[0].last_transition_time, first_time);
        assert_eq!(conditions[0].reason, "StillDone");
    }

    #[test]
    fn test_find_condition() {
        let conditions = vec![Condition::new("Ready", ConditionStatus::True, "Done", "ready")];
        assert!(find_condition(&conditions, "Ready").is_some());
        assert!(find_condition(&conditions, "Other").is_none());
    }

    #[test]
    fn test_normalize_runtime_label() {
        assert_eq!(normalize_runtime_label("python:3.10"), "python-3-10");
        assert_eq!(normalize_runtime_label("node:18-alpine"), "node-18-alpine");
    }

    #[test]
    fn test_security_level_default_is_standard() {
        assert_eq!(SecurityLevel::default(), SecurityLevel::Standard);
    }

    #[test]
    fn test_parse_rfc3339_roundtrip() {
        let now = utc_now_rfc3339();
        assert!(parse_rfc3339(&now).is_some());
    }

    #[test]
    fn test_parse_rfc3339_rejects_garbage() {
        assert!(parse_rfc3339("not-a-date").is_none());
    }
}
